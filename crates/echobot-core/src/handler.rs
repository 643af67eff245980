use tracing::info;

use crate::{
    domain::Message,
    outbox::{OutboundMessage, Outbox},
};

/// Reply policy invoked once per inbound message.
///
/// Implementations must return promptly: the dispatcher calls them inline, so
/// any network work has to be handed off (see [`Outbox`]).
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: &Message);
}

impl<F> MessageHandler for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn handle(&self, message: &Message) {
        self(message)
    }
}

pub const ECHO_PREFIX: &str = "Echo: ";

pub fn echo_reply(text: &str) -> String {
    format!("{ECHO_PREFIX}{text}")
}

/// Default policy: send the text back to the chat it came from.
#[derive(Clone, Debug)]
pub struct EchoHandler {
    outbox: Outbox,
}

impl EchoHandler {
    pub fn new(outbox: Outbox) -> Self {
        Self { outbox }
    }
}

impl MessageHandler for EchoHandler {
    fn handle(&self, message: &Message) {
        let Some(text) = message.text.as_deref() else {
            return;
        };

        info!("[{}] {}", message.sender_label, text);

        self.outbox.enqueue(OutboundMessage {
            chat_id: message.chat_id,
            text: echo_reply(text),
        });
    }
}
