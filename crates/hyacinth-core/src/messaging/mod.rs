//! Cross-messenger abstractions (Telegram today; Discord/Slack later).

pub mod port;
pub mod throttled;
pub mod types;
