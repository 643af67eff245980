/// Core error type for the bot.
///
/// Adapter crates map their specific failures into this type so the poll loop
/// can apply one recovery policy. `Network` and `Transport` are both treated as
/// transient; `Validation` only ever affects a single update.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    /// Connectivity failure: refused connection, timeout, DNS.
    #[error("network error: {0}")]
    Network(String),

    /// The endpoint answered but reported failure (`ok=false`, HTTP error,
    /// unreadable payload).
    #[error("transport error: {0}")]
    Transport(String),

    /// An update that is missing required fields.
    #[error("invalid update: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
