//! Realtime domain - progress events fanned out to dashboard sessions

pub mod dispatcher;
pub mod events;

pub use dispatcher::{website_subject, RealtimeDispatcher};
pub use events::{DiscoveredPage, EventScope, LinkSourceSnapshot, RealtimeEvent, RealtimeMessage};
