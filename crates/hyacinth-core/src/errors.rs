use crate::domain::MessageRef;

/// Core error type for the notifier bot.
///
/// Adapter crates map their specific errors into this type so the core can
/// decide containment consistently: per search cycle, per command, or fatal.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Bad or stale plugin identifier. Fatal to one search cycle, not to the process.
    #[error("unknown plugin {path}: {reason}")]
    UnknownPlugin { path: String, reason: String },

    /// Transient source failure; retried on the next cycle.
    #[error("scrape failed for {plugin}: {message}")]
    Scrape { plugin: String, message: String },

    #[error("malformed listing at index {index}: {reason}")]
    MalformedListing { index: usize, reason: String },

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("command `{command}` failed: {message}")]
    CommandHandler { command: String, message: String },

    #[error("reaction handler already bound to message {0:?}")]
    DuplicateBinding(MessageRef),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),

    /// Shutdown in progress. Never swallowed by command or dispatch boundaries.
    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn scrape(plugin: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Scrape {
            plugin: plugin.into(),
            message: message.to_string(),
        }
    }

    pub fn unknown_plugin(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::UnknownPlugin {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
