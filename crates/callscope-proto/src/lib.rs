//! Wire model for RTC provider notification webhooks.
//!
//! The provider reports channel lifecycle and user presence as numbered
//! events delivered over HTTP with at-least-once semantics. This crate owns
//! the JSON envelope, the closed event-type set, the leave reason codes and
//! the platform/product/client-type mapping tables. It deliberately knows
//! nothing about storage or reconciliation; the daemon builds on top.

mod event;
mod mappings;
mod notification;
mod reason;

pub use event::{EventKind, Role};
pub use mappings::{
    client_type_name, is_known_platform, is_known_product, platform_display, platform_name,
    product_name,
};
pub use notification::{Notification, NotificationPayload, ParseError};
pub use reason::{ReasonCategory, ReasonCode};
