//! In-memory room state.
//!
//! [`RoomStore`] holds everything the dispatcher mutates: per-room
//! message buffers, member lists, unread counters, the active-room
//! pointer, and the ephemeral typing tracker. All mutation flows
//! through the owning session's `&mut` handle path, which is what
//! serializes it per connection.
//!
//! Generic over `I` (instant type) so typing expiry runs on virtual
//! time in tests, mirroring the instant-generic connection machine.

use std::{
    collections::HashMap,
    ops::Sub,
    time::Duration,
};

use parlor_proto::{MemberInfo, MessageId, RoomId, RoomInfo, UserId};
use tracing::debug;

use crate::model::{Delivery, Member, Message, Room};

/// Typing indicators expire after this much inactivity.
pub const TYPING_EXPIRY: Duration = Duration::from_millis(5000);

/// Result of reconciling a `message_sent` confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A provisional entry was replaced in place.
    Replaced {
        /// Temporary id the provisional entry carried.
        local_id: MessageId,
    },
    /// No provisional entry matched; the confirmation was appended.
    ///
    /// Happens when the confirmation refers to a send from another
    /// device on the same account, or when the provisional entry was
    /// already marked failed and resent.
    Appended,
    /// The confirmed id was already buffered; nothing changed.
    Duplicate,
    /// The room is unknown; the confirmation was dropped.
    UnknownRoom,
}

/// Per-room state: metadata plus the buffers the dispatcher mutates.
#[derive(Debug, Clone)]
struct RoomEntry<I> {
    room: Room,
    messages: Vec<Message>,
    members: Vec<Member>,
    typing: HashMap<UserId, I>,
}

impl<I> RoomEntry<I> {
    fn new(room: Room) -> Self {
        Self { room, messages: Vec::new(), members: Vec::new(), typing: HashMap::new() }
    }

    fn refresh_last_message(&mut self) {
        self.room.last_message = self.messages.last().cloned();
    }

    fn sync_member_count(&mut self) {
        self.room.member_count = self.members.len() as u32;
    }
}

/// In-memory state for all rooms visible to one session.
#[derive(Debug, Clone)]
pub struct RoomStore<I> {
    rooms: HashMap<RoomId, RoomEntry<I>>,
    active_room: Option<RoomId>,
    system_seq: u64,
}

impl<I> Default for RoomStore<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> RoomStore<I> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self { rooms: HashMap::new(), active_room: None, system_seq: 0 }
    }

    /// Number of known rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Room metadata. `None` if unknown.
    pub fn room(&self, room_id: &RoomId) -> Option<&Room> {
        self.rooms.get(room_id).map(|e| &e.room)
    }

    /// All known rooms, in no particular order.
    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values().map(|e| &e.room)
    }

    /// Whether the room is known to this store.
    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Message buffer for a room, oldest first. `None` if unknown.
    pub fn messages(&self, room_id: &RoomId) -> Option<&[Message]> {
        self.rooms.get(room_id).map(|e| e.messages.as_slice())
    }

    /// Member list for a room. `None` if unknown.
    pub fn members(&self, room_id: &RoomId) -> Option<&[Member]> {
        self.rooms.get(room_id).map(|e| e.members.as_slice())
    }

    /// Currently active room, if any.
    pub fn active_room(&self) -> Option<&RoomId> {
        self.active_room.as_ref()
    }

    /// Set the active-room pointer.
    pub fn set_active(&mut self, room_id: RoomId) {
        self.active_room = Some(room_id);
    }

    /// Clear the active-room pointer, but only if it equals `room_id`.
    pub fn clear_active_if(&mut self, room_id: &RoomId) {
        if self.active_room.as_ref() == Some(room_id) {
            self.active_room = None;
        }
    }

    /// Seed or refresh room metadata from a `room_list` payload.
    ///
    /// Existing buffers and member lists are preserved: the listing is
    /// denormalized metadata from the out-of-band CRUD service, not a
    /// replacement for live state.
    pub fn seed_rooms(&mut self, rooms: Vec<RoomInfo>) {
        for info in rooms {
            let room = Room::from_info(info);
            match self.rooms.get_mut(&room.id) {
                Some(entry) => {
                    entry.room = room;
                    // Live state beats the listing's denormalized fields
                    if !entry.members.is_empty() {
                        entry.sync_member_count();
                    }
                    if !entry.messages.is_empty() {
                        entry.refresh_last_message();
                    }
                },
                None => {
                    let id = room.id.clone();
                    self.rooms.insert(id, RoomEntry::new(room));
                },
            }
        }
    }

    /// Upsert a room and its full member list (`room_joined`).
    ///
    /// Message buffers survive re-joins (reconnects re-issue joins).
    pub fn upsert_room(&mut self, info: RoomInfo, members: Vec<MemberInfo>) {
        let room = Room::from_info(info);
        let members: Vec<Member> = members.into_iter().map(Member::from_info).collect();

        let entry = self
            .rooms
            .entry(room.id.clone())
            .or_insert_with(|| RoomEntry::new(room.clone()));
        entry.room = room;
        entry.members = members;
        entry.sync_member_count();
        if entry.room.last_message.is_none() {
            entry.refresh_last_message();
        }
    }

    /// Append a message to a room buffer.
    ///
    /// Returns false (and changes nothing) if the room is unknown or a
    /// message with the same id is already buffered (replay guard).
    pub fn append_message(&mut self, message: Message) -> bool {
        let Some(entry) = self.rooms.get_mut(&message.room_id) else {
            debug!(room_id = %message.room_id, "dropping message for unknown room");
            return false;
        };
        if entry.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        entry.messages.push(message);
        entry.refresh_last_message();
        true
    }

    /// Reconcile a `message_sent` confirmation against the buffer.
    ///
    /// Finds the oldest provisional entry in the same room whose
    /// content exactly equals the confirmed content and replaces it in
    /// place (same list position, authoritative id and timestamps).
    /// First match wins; matching never crosses rooms.
    pub fn reconcile(&mut self, confirmed: Message) -> ReconcileOutcome {
        let Some(entry) = self.rooms.get_mut(&confirmed.room_id) else {
            return ReconcileOutcome::UnknownRoom;
        };

        if entry.messages.iter().any(|m| m.id == confirmed.id) {
            return ReconcileOutcome::Duplicate;
        }

        let slot = entry
            .messages
            .iter()
            .position(|m| m.delivery == Delivery::Pending && m.content == confirmed.content);

        match slot {
            Some(index) => {
                let local_id = std::mem::replace(&mut entry.messages[index], confirmed).id;
                entry.refresh_last_message();
                ReconcileOutcome::Replaced { local_id }
            },
            None => {
                entry.messages.push(confirmed);
                entry.refresh_last_message();
                ReconcileOutcome::Appended
            },
        }
    }

    /// Prepend a history page to the room buffer.
    ///
    /// The page is treated as strictly older than everything already
    /// buffered (callers request pages oldest-first via the `before`
    /// cursor). Messages whose ids are already buffered are skipped so
    /// an overlapping page cannot duplicate entries.
    pub fn prepend_history(&mut self, room_id: &RoomId, page: Vec<Message>) -> usize {
        let Some(entry) = self.rooms.get_mut(room_id) else {
            debug!(%room_id, "dropping history page for unknown room");
            return 0;
        };

        let fresh: Vec<Message> = page
            .into_iter()
            .filter(|msg| !entry.messages.iter().any(|m| m.id == msg.id))
            .collect();

        let inserted = fresh.len();
        entry.messages.splice(0..0, fresh);
        entry.refresh_last_message();
        inserted
    }

    /// Apply an edit in place. Returns false if room or message is
    /// unknown (the event is then dropped).
    pub fn edit_message(
        &mut self,
        room_id: &RoomId,
        message_id: &MessageId,
        content: String,
        updated_at: i64,
    ) -> bool {
        match self.message_mut(room_id, message_id) {
            Some(msg) => {
                msg.apply_edit(content, updated_at);
                if let Some(entry) = self.rooms.get_mut(room_id) {
                    entry.refresh_last_message();
                }
                true
            },
            None => false,
        }
    }

    /// Apply a soft delete in place. Returns false if unknown.
    pub fn delete_message(&mut self, room_id: &RoomId, message_id: &MessageId) -> bool {
        match self.message_mut(room_id, message_id) {
            Some(msg) => {
                msg.apply_delete();
                if let Some(entry) = self.rooms.get_mut(room_id) {
                    entry.refresh_last_message();
                }
                true
            },
            None => false,
        }
    }

    /// Add a reaction to a buffered message. Returns false if unknown.
    pub fn add_reaction(
        &mut self,
        room_id: &RoomId,
        message_id: &MessageId,
        key: &str,
        user_id: &UserId,
    ) -> bool {
        self.message_mut(room_id, message_id)
            .map(|msg| msg.add_reaction(key, user_id))
            .is_some()
    }

    /// Remove a reaction from a buffered message. Returns false if
    /// unknown.
    pub fn remove_reaction(
        &mut self,
        room_id: &RoomId,
        message_id: &MessageId,
        key: &str,
        user_id: &UserId,
    ) -> bool {
        self.message_mut(room_id, message_id)
            .map(|msg| msg.remove_reaction(key, user_id))
            .is_some()
    }

    /// Mark a provisional message as failed (ack timeout).
    pub fn mark_failed(&mut self, room_id: &RoomId, local_id: &MessageId) -> bool {
        match self.message_mut(room_id, local_id) {
            Some(msg) if msg.delivery == Delivery::Pending => {
                msg.delivery = Delivery::Failed;
                true
            },
            _ => false,
        }
    }

    /// Oldest confirmed message id, for the `fetch_history` cursor.
    ///
    /// Provisional entries are skipped: the server cannot page relative
    /// to an id it never issued.
    pub fn oldest_confirmed_id(&self, room_id: &RoomId) -> Option<MessageId> {
        self.rooms.get(room_id).and_then(|entry| {
            entry
                .messages
                .iter()
                .find(|m| m.delivery == Delivery::Confirmed)
                .map(|m| m.id.clone())
        })
    }

    /// Increment the unread counter for a room.
    pub fn increment_unread(&mut self, room_id: &RoomId) {
        if let Some(entry) = self.rooms.get_mut(room_id) {
            entry.room.unread_count = entry.room.unread_count.saturating_add(1);
        }
    }

    /// Zero the unread counter for a room.
    pub fn zero_unread(&mut self, room_id: &RoomId) {
        if let Some(entry) = self.rooms.get_mut(room_id) {
            entry.room.unread_count = 0;
        }
    }

    /// Add or replace a member (`user_joined`), appending one synthetic
    /// system message announcing the change.
    ///
    /// Maintains the member-count invariant: `member_count` always
    /// equals the member list length afterwards.
    pub fn member_joined(&mut self, room_id: &RoomId, info: MemberInfo) -> bool {
        let system_id = self.next_system_id();
        let Some(entry) = self.rooms.get_mut(room_id) else {
            debug!(%room_id, "dropping user_joined for unknown room");
            return false;
        };

        let member = Member::from_info(info);
        let announcement = format!("{} joined the room", member.display_name);

        match entry.members.iter_mut().find(|m| m.user_id == member.user_id) {
            Some(existing) => *existing = member,
            None => entry.members.push(member),
        }
        entry.sync_member_count();

        entry.messages.push(Message::system(system_id, room_id.clone(), announcement));
        entry.refresh_last_message();
        true
    }

    /// Remove a member (`user_left`), appending one synthetic system
    /// message announcing the change.
    pub fn member_left(&mut self, room_id: &RoomId, user_id: &UserId, display_name: &str) -> bool {
        let system_id = self.next_system_id();
        let Some(entry) = self.rooms.get_mut(room_id) else {
            debug!(%room_id, "dropping user_left for unknown room");
            return false;
        };

        let position = entry.members.iter().position(|m| m.user_id == *user_id);
        let name = match position {
            Some(index) => {
                let removed = entry.members.remove(index);
                if display_name.is_empty() { removed.display_name } else { display_name.to_string() }
            },
            None => {
                if display_name.is_empty() { user_id.clone() } else { display_name.to_string() }
            },
        };
        entry.sync_member_count();
        entry.typing.remove(user_id);

        entry.messages.push(Message::system(system_id, room_id.clone(), format!("{name} left the room")));
        entry.refresh_last_message();
        true
    }

    fn next_system_id(&mut self) -> MessageId {
        self.system_seq += 1;
        format!("sys-{}", self.system_seq)
    }

    fn message_mut(&mut self, room_id: &RoomId, message_id: &MessageId) -> Option<&mut Message> {
        self.rooms
            .get_mut(room_id)?
            .messages
            .iter_mut()
            .find(|m| m.id == *message_id)
    }
}

impl<I> RoomStore<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Record (or refresh) a typing signal for `(room, user)`.
    pub fn typing_started(&mut self, room_id: &RoomId, user_id: UserId, now: I) {
        if let Some(entry) = self.rooms.get_mut(room_id) {
            entry.typing.insert(user_id, now);
        }
    }

    /// Remove a typing signal immediately (`user_typing_stopped`).
    pub fn typing_stopped(&mut self, room_id: &RoomId, user_id: &UserId) {
        if let Some(entry) = self.rooms.get_mut(room_id) {
            entry.typing.remove(user_id);
        }
    }

    /// Users currently typing in a room, resolved to display names.
    ///
    /// Expired entries (>= 5000 ms since the last signal) are purged
    /// lazily on this read. A typing user who is no longer a member is
    /// silently dropped: we have no name to show for them.
    pub fn typing_users(&mut self, room_id: &RoomId, now: I) -> Vec<(UserId, String)> {
        let Some(entry) = self.rooms.get_mut(room_id) else {
            return Vec::new();
        };

        entry.typing.retain(|_, signaled| now - *signaled < TYPING_EXPIRY);

        let mut typing: Vec<(UserId, String)> = entry
            .typing
            .keys()
            .filter_map(|user_id| {
                entry
                    .members
                    .iter()
                    .find(|m| m.user_id == *user_id)
                    .map(|m| (user_id.clone(), m.display_name.clone()))
            })
            .collect();
        typing.sort();
        typing
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::{Duration, Instant};

    use parlor_proto::{MessageKind, Role, RoomKind};
    use serde_json::Map;

    use super::*;

    fn room_info(id: &str) -> RoomInfo {
        RoomInfo {
            id: id.into(),
            name: Some(format!("room {id}")),
            kind: RoomKind::Group,
            created_at: 1000,
            member_count: 0,
            last_message: None,
            unread_count: 0,
            metadata: Map::new(),
        }
    }

    fn member_info(user: &str, name: &str) -> MemberInfo {
        MemberInfo {
            user_id: user.into(),
            display_name: name.into(),
            role: Role::Member,
            online: true,
            last_read_at: None,
        }
    }

    fn confirmed(id: &str, room: &str, content: &str, at: i64) -> Message {
        let mut msg = Message::provisional(
            id.into(),
            room.into(),
            "u1".into(),
            MessageKind::Text,
            content.into(),
        );
        msg.delivery = Delivery::Confirmed;
        msg.created_at = at;
        msg.updated_at = at;
        msg
    }

    fn store_with_room(id: &str) -> RoomStore<Instant> {
        let mut store = RoomStore::new();
        store.upsert_room(room_info(id), vec![member_info("u1", "Ada")]);
        store
    }

    #[test]
    fn upsert_preserves_buffer_across_rejoin() {
        let mut store = store_with_room("r1");
        assert!(store.append_message(confirmed("m1", "r1", "hello", 10)));

        store.upsert_room(room_info("r1"), vec![member_info("u1", "Ada")]);
        assert_eq!(store.messages(&"r1".to_string()).map(<[Message]>::len), Some(1));
    }

    #[test]
    fn append_dedupes_by_id() {
        let mut store = store_with_room("r1");
        assert!(store.append_message(confirmed("m1", "r1", "hello", 10)));
        assert!(!store.append_message(confirmed("m1", "r1", "hello", 10)));
    }

    #[test]
    fn reconcile_replaces_oldest_matching_pending_in_place() {
        let mut store = store_with_room("r1");
        let p1 = Message::provisional(
            "local-1".into(),
            "r1".into(),
            "u1".into(),
            MessageKind::Text,
            "hello".into(),
        );
        let p2 = Message::provisional(
            "local-2".into(),
            "r1".into(),
            "u1".into(),
            MessageKind::Text,
            "hello".into(),
        );
        store.append_message(p1);
        store.append_message(p2);

        let outcome = store.reconcile(confirmed("m9", "r1", "hello", 50));
        assert_eq!(outcome, ReconcileOutcome::Replaced { local_id: "local-1".into() });

        let messages = store.messages(&"r1".to_string()).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "m9");
        assert_eq!(messages[0].delivery, Delivery::Confirmed);
        assert_eq!(messages[1].id, "local-2");
        assert_eq!(messages[1].delivery, Delivery::Pending);
    }

    #[test]
    fn reconcile_without_match_appends() {
        let mut store = store_with_room("r1");
        let outcome = store.reconcile(confirmed("m1", "r1", "from other device", 10));
        assert_eq!(outcome, ReconcileOutcome::Appended);
        assert_eq!(store.messages(&"r1".to_string()).map(<[Message]>::len), Some(1));
    }

    #[test]
    fn reconcile_never_crosses_rooms() {
        let mut store = store_with_room("r1");
        store.upsert_room(room_info("r2"), vec![]);
        store.append_message(Message::provisional(
            "local-1".into(),
            "r1".into(),
            "u1".into(),
            MessageKind::Text,
            "hello".into(),
        ));

        let outcome = store.reconcile(confirmed("m1", "r2", "hello", 10));
        assert_eq!(outcome, ReconcileOutcome::Appended);

        let r1 = store.messages(&"r1".to_string()).unwrap();
        assert_eq!(r1[0].delivery, Delivery::Pending);
    }

    #[test]
    fn history_prepends_before_buffered_messages() {
        let mut store = store_with_room("r1");
        store.append_message(confirmed("m10", "r1", "newest", 100));

        let inserted = store.prepend_history(&"r1".to_string(), vec![
            confirmed("m1", "r1", "oldest", 10),
            confirmed("m2", "r1", "older", 20),
        ]);
        assert_eq!(inserted, 2);

        let ids: Vec<&str> =
            store.messages(&"r1".to_string()).unwrap().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m10"]);
    }

    #[test]
    fn overlapping_history_page_skips_duplicates() {
        let mut store = store_with_room("r1");
        store.append_message(confirmed("m2", "r1", "older", 20));

        let inserted = store.prepend_history(&"r1".to_string(), vec![
            confirmed("m1", "r1", "oldest", 10),
            confirmed("m2", "r1", "older", 20),
        ]);
        assert_eq!(inserted, 1);
        assert_eq!(store.messages(&"r1".to_string()).map(<[Message]>::len), Some(2));
    }

    #[test]
    fn member_joined_announces_and_counts() {
        let mut store = store_with_room("r1");
        let before = store.room(&"r1".to_string()).unwrap().member_count;

        store.member_joined(&"r1".to_string(), member_info("u2", "Sam"));

        let room = store.room(&"r1".to_string()).unwrap();
        assert_eq!(room.member_count, before + 1);

        let system: Vec<&Message> = store
            .messages(&"r1".to_string())
            .unwrap()
            .iter()
            .filter(|m| m.kind == MessageKind::System)
            .collect();
        assert_eq!(system.len(), 1);
        assert!(system[0].content.contains("Sam"));
        assert!(system[0].sender_id.is_none());
    }

    #[test]
    fn member_left_announces_and_counts() {
        let mut store = store_with_room("r1");
        store.member_joined(&"r1".to_string(), member_info("u2", "Sam"));

        store.member_left(&"r1".to_string(), &"u2".to_string(), "");

        let room = store.room(&"r1".to_string()).unwrap();
        assert_eq!(room.member_count, 1);
        let last = store.messages(&"r1".to_string()).unwrap().last().cloned().unwrap();
        assert!(last.content.contains("Sam"));
        assert!(last.content.contains("left"));
    }

    #[test]
    fn typing_expires_after_five_seconds() {
        let mut store = store_with_room("r1");
        let t0 = Instant::now();
        store.typing_started(&"r1".to_string(), "u1".into(), t0);

        let just_before = t0 + Duration::from_millis(4999);
        assert_eq!(store.typing_users(&"r1".to_string(), just_before).len(), 1);

        let at_expiry = t0 + Duration::from_millis(5000);
        assert!(store.typing_users(&"r1".to_string(), at_expiry).is_empty());
    }

    #[test]
    fn typing_stop_removes_immediately() {
        let mut store = store_with_room("r1");
        let t0 = Instant::now();
        store.typing_started(&"r1".to_string(), "u1".into(), t0);
        store.typing_stopped(&"r1".to_string(), &"u1".to_string());
        assert!(store.typing_users(&"r1".to_string(), t0).is_empty());
    }

    #[test]
    fn typing_refresh_extends_expiry() {
        let mut store = store_with_room("r1");
        let t0 = Instant::now();
        store.typing_started(&"r1".to_string(), "u1".into(), t0);

        let t1 = t0 + Duration::from_millis(4000);
        store.typing_started(&"r1".to_string(), "u1".into(), t1);

        let t2 = t0 + Duration::from_millis(8000);
        assert_eq!(store.typing_users(&"r1".to_string(), t2).len(), 1);
    }

    #[test]
    fn typing_nonmember_is_silently_dropped() {
        let mut store = store_with_room("r1");
        let t0 = Instant::now();
        store.typing_started(&"r1".to_string(), "ghost".into(), t0);
        assert!(store.typing_users(&"r1".to_string(), t0).is_empty());
    }

    #[test]
    fn mark_failed_only_touches_pending() {
        let mut store = store_with_room("r1");
        store.append_message(Message::provisional(
            "local-1".into(),
            "r1".into(),
            "u1".into(),
            MessageKind::Text,
            "hi".into(),
        ));
        store.append_message(confirmed("m1", "r1", "other", 10));

        assert!(store.mark_failed(&"r1".to_string(), &"local-1".to_string()));
        assert!(!store.mark_failed(&"r1".to_string(), &"m1".to_string()));
        assert!(!store.mark_failed(&"r1".to_string(), &"local-1".to_string()));
    }

    #[test]
    fn oldest_confirmed_skips_pending_entries() {
        let mut store = store_with_room("r1");
        store.append_message(Message::provisional(
            "local-1".into(),
            "r1".into(),
            "u1".into(),
            MessageKind::Text,
            "hi".into(),
        ));
        assert_eq!(store.oldest_confirmed_id(&"r1".to_string()), None);

        store.prepend_history(&"r1".to_string(), vec![confirmed("m1", "r1", "old", 10)]);
        assert_eq!(store.oldest_confirmed_id(&"r1".to_string()), Some("m1".to_string()));
    }

    #[test]
    fn clear_active_only_when_matching() {
        let mut store: RoomStore<Instant> = RoomStore::new();
        store.set_active("r1".into());

        store.clear_active_if(&"r2".to_string());
        assert_eq!(store.active_room(), Some(&"r1".to_string()));

        store.clear_active_if(&"r1".to_string());
        assert_eq!(store.active_room(), None);
    }

    #[test]
    fn last_message_tracks_buffer_tail() {
        let mut store = store_with_room("r1");
        store.append_message(confirmed("m1", "r1", "first", 10));
        store.append_message(confirmed("m2", "r1", "second", 20));

        let last = store.room(&"r1".to_string()).unwrap().last_message.clone().unwrap();
        assert_eq!(last.id, "m2");

        store.delete_message(&"r1".to_string(), &"m2".to_string());
        let last = store.room(&"r1".to_string()).unwrap().last_message.clone().unwrap();
        assert!(last.deleted);
    }
}
