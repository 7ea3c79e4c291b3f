//! Leave reason codes and their quality semantics.
//!
//! The provider stamps leave events with a numeric reason. Quality scoring
//! weighs categories, not individual codes, so each code maps to one of a
//! small set of categories.

/// Severity bucket a reason code falls into for quality analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCategory {
    /// Clean exit.
    Normal,
    /// Timeouts, connection drops, multi-IP switching.
    Network,
    /// Provider-side load shedding.
    Server,
    /// Permission changes and device switches driven by admins/users.
    Control,
    /// Reason 999: client churn, rapid join/leave.
    Abnormal,
    /// Reason 0 or anything unrecognized.
    Unknown,
}

/// A decoded leave reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    Normal,
    ConnectionTimeout,
    Permissions,
    ServerLoad,
    DeviceSwitch,
    IpSwitching,
    NetworkFailure,
    AbnormalUser,
    Other,
}

impl ReasonCode {
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Normal,
            2 => Self::ConnectionTimeout,
            3 => Self::Permissions,
            4 => Self::ServerLoad,
            5 => Self::DeviceSwitch,
            9 => Self::IpSwitching,
            10 => Self::NetworkFailure,
            999 => Self::AbnormalUser,
            _ => Self::Other,
        }
    }

    pub fn category(self) -> ReasonCategory {
        match self {
            Self::Normal => ReasonCategory::Normal,
            Self::ConnectionTimeout | Self::IpSwitching | Self::NetworkFailure => {
                ReasonCategory::Network
            }
            Self::ServerLoad => ReasonCategory::Server,
            Self::Permissions | Self::DeviceSwitch => ReasonCategory::Control,
            Self::AbnormalUser => ReasonCategory::Abnormal,
            Self::Other => ReasonCategory::Unknown,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Normal => "normal leave",
            Self::ConnectionTimeout => "connection timeout",
            Self::Permissions => "permission change",
            Self::ServerLoad => "server load adjustment",
            Self::DeviceSwitch => "device switch",
            Self::IpSwitching => "multiple-IP switching",
            Self::NetworkFailure => "network failure",
            Self::AbnormalUser => "abnormal user",
            Self::Other => "other/unknown",
        }
    }
}
