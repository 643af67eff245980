use std::time::Duration;

use async_trait::async_trait;

use crate::{
    domain::{Batch, ChatId},
    Result,
};

/// Hexagonal port for the remote messaging endpoint.
///
/// Implementations hold no cursor state; the poll loop passes the offset in.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Long-poll for updates with `id >= offset`, waiting server-side for at
    /// most `timeout`. "Nothing new" is `Ok(vec![])`.
    ///
    /// Fails with [`crate::Error::Network`] on connectivity problems and with
    /// [`crate::Error::Transport`] when the endpoint reports failure.
    async fn fetch_updates(&self, offset: i64, timeout: Duration) -> Result<Batch>;

    /// Send `text` to `chat_id`. Returns whether the endpoint acknowledged it.
    /// Never retries.
    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<bool>;
}
