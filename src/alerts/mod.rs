/// Cooldown tracking, notification routing and channel sinks
pub mod cooldown;
pub mod digest;
pub mod email;
pub mod router;
pub mod sinks;
pub mod telegram;

pub use cooldown::{CooldownEntry, CooldownTracker};
pub use digest::DigestSink;
pub use email::EmailSink;
pub use router::{DeliveryReport, NotificationRouter, NotificationRouterBuilder, SinkOutcome};
pub use sinks::{ChannelSink, LogSink, RecordingSink};
pub use telegram::TelegramSink;
