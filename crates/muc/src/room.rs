use std::collections::BTreeMap;

use natter_core::event::{MucAffiliation, MucRole, PresenceShow, RoomId};

/// Lifecycle of one room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// Join presence sent, waiting for the room to echo our own presence.
    Joining,
    Joined,
    /// A configuration form is open.
    Configuring,
    /// We left (or were removed); the record survives until closed.
    Left,
}

impl RoomState {
    /// Whether we are an occupant.
    pub fn is_present(&self) -> bool {
        matches!(self, RoomState::Joined | RoomState::Configuring)
    }
}

/// Which form the room sent us last and is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingForm {
    Configuration,
    Registration,
}

/// An occupant as far as presence tells us. Fields the room never sent stay
/// at their defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub handle: String,
    pub real_address: Option<String>,
    pub affiliation: MucAffiliation,
    pub role: MucRole,
    pub show: PresenceShow,
    pub status: Option<String>,
}

impl Member {
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            real_address: None,
            affiliation: MucAffiliation::None,
            role: MucRole::None,
            show: PresenceShow::Available,
            status: None,
        }
    }

    fn same_status(&self, other: &Member) -> bool {
        self.show == other.show
            && self.status == other.status
            && self.affiliation == other.affiliation
            && self.role == other.role
    }
}

/// Result of recording an occupant's presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberUpdate {
    Joined,
    Changed,
    /// The room repeated a status we already have.
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    /// Our own handle in the room.
    pub handle: String,
    pub password: Option<String>,
    pub state: RoomState,
    pub topic: Option<String>,
    pub topic_setter: Option<String>,
    pub pending_form: Option<PendingForm>,
    members: BTreeMap<String, Member>,
}

impl Room {
    pub fn new(id: RoomId, handle: impl Into<String>, password: Option<String>) -> Self {
        Self {
            id,
            handle: handle.into(),
            password,
            state: RoomState::Joining,
            topic: None,
            topic_setter: None,
            pending_form: None,
            members: BTreeMap::new(),
        }
    }

    /// `room@server/handle`
    pub fn own_address(&self) -> String {
        self.occupant_address(&self.handle)
    }

    pub fn occupant_address(&self, handle: &str) -> String {
        format!("{}/{handle}", self.id)
    }

    pub fn member(&self, handle: &str) -> Option<&Member> {
        self.members.get(handle)
    }

    pub fn members(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Record presence for `member.handle`. A real address learned earlier
    /// is kept when the new presence does not carry one.
    pub fn track_handle(&mut self, mut member: Member) -> MemberUpdate {
        match self.members.get_mut(&member.handle) {
            None => {
                self.members.insert(member.handle.clone(), member);
                MemberUpdate::Joined
            }
            Some(existing) => {
                if member.real_address.is_none() {
                    member.real_address = existing.real_address.take();
                }
                let unchanged = existing.same_status(&member);
                *existing = member;
                if unchanged {
                    MemberUpdate::Unchanged
                } else {
                    MemberUpdate::Changed
                }
            }
        }
    }

    pub fn remove_handle(&mut self, handle: &str) -> Option<Member> {
        self.members.remove(handle)
    }

    /// Move a member to a new handle. Returns false when `old` is unknown.
    pub fn rename_handle(&mut self, old: &str, new: &str) -> bool {
        let Some(mut member) = self.members.remove(old) else {
            return false;
        };
        member.handle = new.to_string();
        self.members.insert(new.to_string(), member);
        true
    }

    pub fn clear_members(&mut self) {
        self.members.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room() -> Room {
        Room::new(RoomId::new("chapel", "conference.verona.lit"), "romeo", None)
    }

    #[test]
    fn addresses_use_the_room_key() {
        let room = Room::new(RoomId::new("Chapel", "Conference.Verona.lit"), "Romeo", None);
        assert_eq!(room.own_address(), "chapel@conference.verona.lit/Romeo");
        assert_eq!(room.state, RoomState::Joining);
    }

    #[test]
    fn repeated_status_is_unchanged() {
        let mut room = room();
        let mut member = Member::new("mercutio");
        member.status = Some("Jesting".to_string());
        assert_eq!(room.track_handle(member.clone()), MemberUpdate::Joined);
        assert_eq!(room.track_handle(member.clone()), MemberUpdate::Unchanged);

        member.show = PresenceShow::Away;
        assert_eq!(room.track_handle(member.clone()), MemberUpdate::Changed);

        member.role = MucRole::Moderator;
        assert_eq!(room.track_handle(member), MemberUpdate::Changed);
        assert_eq!(room.member_count(), 1);
    }

    #[test]
    fn real_address_survives_presence_without_one() {
        let mut room = room();
        let mut member = Member::new("benvolio");
        member.real_address = Some("benvolio@montague.lit".to_string());
        room.track_handle(member);
        room.track_handle(Member::new("benvolio"));
        assert_eq!(
            room.member("benvolio").and_then(|m| m.real_address.as_deref()),
            Some("benvolio@montague.lit")
        );
    }

    #[test]
    fn rename_moves_the_record() {
        let mut room = room();
        room.track_handle(Member::new("mercutio"));
        assert!(room.rename_handle("mercutio", "queen-mab"));
        assert!(room.member("mercutio").is_none());
        assert_eq!(room.member("queen-mab").unwrap().handle, "queen-mab");
        assert!(!room.rename_handle("nobody", "x"));
    }
}
