//! Telegram Bot API adapter (reqwest).
//!
//! Implements the `echobot-core` [`Transport`] port with `getUpdates` long
//! polling and `sendMessage`.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;

use echobot_core::{
    config::Config,
    domain::{Batch, ChatId, Message},
    errors::Error,
    poll::PollLoop,
    ports::Transport,
    Result,
};

mod wire;

/// Extra time on top of the long-poll timeout before the HTTP request itself
/// is abandoned.
const HTTP_SLACK: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TelegramTransport {
    http: reqwest::Client,
    api_base: String,
    token: String,
    limit: u32,
    send_timeout: Duration,
}

impl std::fmt::Debug for TelegramTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTransport")
            .field("api_base", &self.api_base)
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl TelegramTransport {
    pub fn new(cfg: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Config(format!("http client build failed: {e}")))?;

        Ok(Self {
            http,
            api_base: cfg.api_base.clone(),
            token: cfg.bot_token.clone(),
            limit: cfg.poll_limit,
            send_timeout: cfg.send_timeout,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token, method)
    }

    /// reqwest errors embed the request URL, which contains the token.
    fn map_err(e: reqwest::Error) -> Error {
        Error::Network(e.without_url().to_string())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn fetch_updates(&self, offset: i64, timeout: Duration) -> Result<Batch> {
        let resp = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout.as_secs().to_string()),
                ("limit", self.limit.to_string()),
            ])
            .timeout(timeout + HTTP_SLACK)
            .send()
            .await
            .map_err(Self::map_err)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Self::map_err)?;
        let batch = wire::decode_updates(status, &body)?;

        if !batch.is_empty() {
            debug!(offset, count = batch.len(), "fetched updates");
        }
        Ok(batch)
    }

    async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<bool> {
        let resp = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&wire::SendMessageRequest {
                chat_id: chat_id.0,
                text,
            })
            .timeout(self.send_timeout)
            .send()
            .await
            .map_err(Self::map_err)?;

        let status = resp.status();
        let body = resp.text().await.map_err(Self::map_err)?;
        let acked = wire::decode_ack(status, &body);
        if !acked {
            debug!(
                chat_id = chat_id.0,
                %status,
                body = %body.chars().take(200).collect::<String>(),
                "sendMessage not acknowledged"
            );
        }
        Ok(acked)
    }
}

/// One short poll: return the text and chat of the newest pending message.
///
/// Everything pending is consumed from this process's point of view only; the
/// cursor is not persisted, so a later poller will see the same updates again.
pub async fn latest_message(cfg: &Config) -> Result<Option<(String, ChatId)>> {
    let transport = Arc::new(TelegramTransport::new(cfg)?);
    let ignore = |_: &Message| {};
    let mut poll = PollLoop::new(transport, Arc::new(ignore), cfg.poll_config());

    Ok(poll
        .check_latest()
        .await?
        .and_then(|m| m.text.map(|text| (text, m.chat_id))))
}

/// Send one message outside of the poll loop.
pub async fn send_reply(cfg: &Config, chat_id: ChatId, text: &str) -> Result<bool> {
    TelegramTransport::new(cfg)?.send_message(chat_id, text).await
}
