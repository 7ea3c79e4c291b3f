//! The closed event-type set the provider sends.
//!
//! Codes outside this set are persisted raw and otherwise ignored by the
//! daemon, so `from_code` returns `Option` rather than failing the parse.

use std::fmt;

/// A user's role within a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Host,
    Audience,
}

impl Role {
    /// Stable string form used in storage and API responses.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Host => "host",
            Role::Audience => "audience",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "host" => Some(Role::Host),
            "audience" => Some(Role::Audience),
            _ => None,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Role::Host => Role::Audience,
            Role::Audience => Role::Host,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Interpreted notification event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// 101 — channel created.
    ChannelCreated,
    /// 102 — channel destroyed.
    ChannelDestroyed,
    /// 103 — host join (broadcast mode).
    HostJoin,
    /// 104 — host leave (broadcast mode).
    HostLeave,
    /// 105 — audience join.
    AudienceJoin,
    /// 106 — audience leave.
    AudienceLeave,
    /// 107 — host join (communication mode).
    CommunicationJoin,
    /// 108 — host leave (communication mode).
    CommunicationLeave,
    /// 111 — role change to broadcaster.
    RoleToHost,
    /// 112 — role change to audience.
    RoleToAudience,
}

impl EventKind {
    /// Map a wire code onto the closed set. Unknown codes yield `None`.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            101 => Some(Self::ChannelCreated),
            102 => Some(Self::ChannelDestroyed),
            103 => Some(Self::HostJoin),
            104 => Some(Self::HostLeave),
            105 => Some(Self::AudienceJoin),
            106 => Some(Self::AudienceLeave),
            107 => Some(Self::CommunicationJoin),
            108 => Some(Self::CommunicationLeave),
            111 => Some(Self::RoleToHost),
            112 => Some(Self::RoleToAudience),
            _ => None,
        }
    }

    pub fn code(self) -> i64 {
        match self {
            Self::ChannelCreated => 101,
            Self::ChannelDestroyed => 102,
            Self::HostJoin => 103,
            Self::HostLeave => 104,
            Self::AudienceJoin => 105,
            Self::AudienceLeave => 106,
            Self::CommunicationJoin => 107,
            Self::CommunicationLeave => 108,
            Self::RoleToHost => 111,
            Self::RoleToAudience => 112,
        }
    }

    pub fn is_join(self) -> bool {
        matches!(
            self,
            Self::HostJoin | Self::AudienceJoin | Self::CommunicationJoin
        )
    }

    pub fn is_leave(self) -> bool {
        matches!(
            self,
            Self::HostLeave | Self::AudienceLeave | Self::CommunicationLeave
        )
    }

    pub fn is_role_change(self) -> bool {
        matches!(self, Self::RoleToHost | Self::RoleToAudience)
    }

    /// Join, leave and role-change events all describe a single user.
    pub fn is_user_event(self) -> bool {
        self.is_join() || self.is_leave() || self.is_role_change()
    }

    /// The role implied by a join/leave event type.
    ///
    /// Host and communication-mode events both imply `Host`; only 105/106
    /// imply `Audience`. Lifecycle and role-change events carry none.
    pub fn implied_role(self) -> Option<Role> {
        match self {
            Self::HostJoin | Self::HostLeave | Self::CommunicationJoin | Self::CommunicationLeave => {
                Some(Role::Host)
            }
            Self::AudienceJoin | Self::AudienceLeave => Some(Role::Audience),
            _ => None,
        }
    }

    /// Communication mode fixed at session creation: 1 for communication-mode
    /// joins/leaves, 0 for broadcast mode. Role switches never change it.
    pub fn communication_mode(self) -> i64 {
        match self {
            Self::CommunicationJoin | Self::CommunicationLeave => 1,
            _ => 0,
        }
    }

    /// The role a 111/112 event switches to.
    pub fn role_target(self) -> Option<Role> {
        match self {
            Self::RoleToHost => Some(Role::Host),
            Self::RoleToAudience => Some(Role::Audience),
            _ => None,
        }
    }

    /// Human-readable name for logging.
    pub fn name(self) -> &'static str {
        match self {
            Self::ChannelCreated => "channel created",
            Self::ChannelDestroyed => "channel destroyed",
            Self::HostJoin => "host join",
            Self::HostLeave => "host leave",
            Self::AudienceJoin => "audience join",
            Self::AudienceLeave => "audience leave",
            Self::CommunicationJoin => "communication join",
            Self::CommunicationLeave => "communication leave",
            Self::RoleToHost => "role change to broadcaster",
            Self::RoleToAudience => "role change to audience",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        for code in [101, 102, 103, 104, 105, 106, 107, 108, 111, 112] {
            let kind = EventKind::from_code(code).unwrap();
            assert_eq!(kind.code(), code);
        }
        assert!(EventKind::from_code(109).is_none());
        assert!(EventKind::from_code(0).is_none());
    }

    #[test]
    fn implied_roles() {
        assert_eq!(EventKind::HostJoin.implied_role(), Some(Role::Host));
        assert_eq!(EventKind::AudienceJoin.implied_role(), Some(Role::Audience));
        assert_eq!(
            EventKind::CommunicationLeave.implied_role(),
            Some(Role::Host)
        );
        assert_eq!(EventKind::ChannelCreated.implied_role(), None);
        assert_eq!(EventKind::RoleToHost.implied_role(), None);
    }

    #[test]
    fn communication_mode_only_for_107_108() {
        assert_eq!(EventKind::CommunicationJoin.communication_mode(), 1);
        assert_eq!(EventKind::CommunicationLeave.communication_mode(), 1);
        assert_eq!(EventKind::HostJoin.communication_mode(), 0);
        assert_eq!(EventKind::AudienceJoin.communication_mode(), 0);
    }

    #[test]
    fn role_targets() {
        assert_eq!(EventKind::RoleToHost.role_target(), Some(Role::Host));
        assert_eq!(
            EventKind::RoleToAudience.role_target(),
            Some(Role::Audience)
        );
        assert_eq!(EventKind::HostJoin.role_target(), None);
    }
}
