//! The long-poll driver.
//!
//! One fetch at a time, modelled as an explicit state machine:
//!
//! ```text
//! Polling --ok--> Dispatching --> Polling
//!    |                               ^
//!    +--err--> ErrorBackoff --sleep--+
//! ```
//!
//! Cancellation is checked at the top of every `Polling` step and also races
//! the in-flight fetch and the backoff sleep, so the loop stops without waiting
//! out a full long-poll window.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    cursor::Cursor,
    dispatcher::dispatch,
    domain::{Batch, Message, UpdateKind},
    handler::MessageHandler,
    ports::Transport,
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct PollConfig {
    /// Server-side long-poll timeout passed to every fetch.
    pub poll_timeout: Duration,
    /// Fixed sleep after a failed fetch.
    pub error_backoff: Duration,
    /// Timeout used by [`PollLoop::check_latest`].
    pub latest_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_timeout: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5),
            latest_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollState {
    Polling,
    Dispatching(Batch),
    ErrorBackoff,
    Stopped,
}

pub struct PollLoop {
    transport: Arc<dyn Transport>,
    handler: Arc<dyn MessageHandler>,
    cursor: Cursor,
    cfg: PollConfig,
    state: PollState,
}

impl PollLoop {
    pub fn new(
        transport: Arc<dyn Transport>,
        handler: Arc<dyn MessageHandler>,
        cfg: PollConfig,
    ) -> Self {
        Self {
            transport,
            handler,
            cursor: Cursor::new(),
            cfg,
            state: PollState::Polling,
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Drive the loop until `cancel` fires. Errors never end the loop.
    pub async fn run(&mut self, cancel: CancellationToken) {
        info!("Bot started. Polling for messages...");
        while self.state != PollState::Stopped {
            self.step(&cancel).await;
        }
        info!(next_offset = self.cursor.next_offset(), "polling stopped");
    }

    /// Perform exactly one state transition and return the new state.
    ///
    /// The state only changes once the transition completes, so dropping this
    /// future mid-fetch or mid-backoff leaves the loop where it was.
    pub async fn step(&mut self, cancel: &CancellationToken) -> &PollState {
        let next = match &self.state {
            PollState::Polling => self.poll(cancel).await,
            PollState::Dispatching(batch) => {
                self.cursor.advance(batch);
                let report = dispatch(batch, self.handler.as_ref());
                if !batch.is_empty() {
                    debug!(
                        handled = report.handled,
                        skipped = report.skipped,
                        invalid = report.invalid,
                        next_offset = self.cursor.next_offset(),
                        "batch dispatched"
                    );
                }
                PollState::Polling
            }
            PollState::ErrorBackoff => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => PollState::Stopped,
                    _ = sleep(self.cfg.error_backoff) => PollState::Polling,
                }
            }
            PollState::Stopped => PollState::Stopped,
        };
        self.state = next;
        &self.state
    }

    async fn poll(&self, cancel: &CancellationToken) -> PollState {
        if cancel.is_cancelled() {
            return PollState::Stopped;
        }

        let offset = self.cursor.next_offset();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => PollState::Stopped,
            res = self.transport.fetch_updates(offset, self.cfg.poll_timeout) => match res {
                Ok(batch) => PollState::Dispatching(batch),
                Err(e) => {
                    warn!(
                        offset,
                        error = %e,
                        backoff = ?self.cfg.error_backoff,
                        "fetch failed, backing off"
                    );
                    PollState::ErrorBackoff
                }
            },
        }
    }

    /// One short fetch: move the cursor past everything pending and return the
    /// message of the newest update, if it carries one.
    ///
    /// Nothing is dispatched; older updates in the batch are consumed silently.
    pub async fn check_latest(&mut self) -> Result<Option<Message>> {
        let batch = self
            .transport
            .fetch_updates(self.cursor.next_offset(), self.cfg.latest_timeout)
            .await?;
        self.cursor.advance(&batch);

        Ok(batch.into_iter().last().and_then(|u| match u.kind {
            UpdateKind::Message(m) => Some(m),
            _ => None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::{ChatId, Update},
        handler::EchoHandler,
        outbox::{Outbox, SendWorker, SendWorkerConfig},
        Error,
    };
    use async_trait::async_trait;
    use std::{collections::VecDeque, sync::Mutex};

    /// Replays canned fetch results, then blocks like an idle long poll.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Batch>>>,
        offsets: Mutex<Vec<i64>>,
        sent: Mutex<Vec<(i64, String)>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<Batch>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            })
        }

        fn offsets(&self) -> Vec<i64> {
            self.offsets.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch_updates(&self, offset: i64, _timeout: Duration) -> Result<Batch> {
            self.offsets.lock().unwrap().push(offset);
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some(res) => res,
                None => std::future::pending().await,
            }
        }

        async fn send_message(&self, chat_id: ChatId, text: &str) -> Result<bool> {
            self.sent.lock().unwrap().push((chat_id.0, text.to_string()));
            Ok(true)
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl MessageHandler for Recorder {
        fn handle(&self, message: &Message) {
            self.seen
                .lock()
                .unwrap()
                .push(message.text.clone().unwrap_or_default());
        }
    }

    fn text_update(id: i64, chat: i64, text: &str) -> Update {
        Update::message(id, Message::text(ChatId(chat), text))
    }

    #[tokio::test]
    async fn happy_path_polls_dispatches_and_advances() {
        let transport = ScriptedTransport::new(vec![Ok(vec![
            text_update(1, 1, "a"),
            text_update(2, 1, "b"),
        ])]);
        let handler = Arc::new(Recorder::default());
        let mut poll = PollLoop::new(transport.clone(), handler.clone(), PollConfig::default());
        let cancel = CancellationToken::new();

        assert!(matches!(poll.step(&cancel).await, PollState::Dispatching(b) if b.len() == 2));
        assert_eq!(poll.cursor().next_offset(), 0);
        assert_eq!(poll.step(&cancel).await, &PollState::Polling);
        assert_eq!(poll.cursor().next_offset(), 3);
        assert_eq!(*handler.seen.lock().unwrap(), vec!["a", "b"]);
        assert_eq!(transport.offsets(), vec![0]);
    }

    #[tokio::test]
    async fn empty_fetch_keeps_cursor_and_invokes_nothing() {
        let transport = ScriptedTransport::new(vec![Ok(Vec::new())]);
        let handler = Arc::new(Recorder::default());
        let mut poll = PollLoop::new(transport, handler.clone(), PollConfig::default());
        let cancel = CancellationToken::new();

        poll.step(&cancel).await;
        poll.step(&cancel).await;

        assert_eq!(poll.cursor().next_offset(), 0);
        assert!(handler.seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn network_error_backs_off_then_retries_same_offset() {
        let transport = ScriptedTransport::new(vec![
            Ok(vec![text_update(9, 1, "first")]),
            Err(Error::Network("connection refused".to_string())),
            Ok(Vec::new()),
        ]);
        let mut poll = PollLoop::new(
            transport.clone(),
            Arc::new(Recorder::default()),
            PollConfig::default(),
        );
        let cancel = CancellationToken::new();

        poll.step(&cancel).await;
        poll.step(&cancel).await;
        assert_eq!(poll.step(&cancel).await, &PollState::ErrorBackoff);
        assert_eq!(poll.cursor().next_offset(), 10);

        let started = tokio::time::Instant::now();
        assert_eq!(poll.step(&cancel).await, &PollState::Polling);
        assert!(started.elapsed() >= Duration::from_secs(5));

        poll.step(&cancel).await;
        assert_eq!(transport.offsets(), vec![0, 10, 10]);
        assert_eq!(poll.cursor().next_offset(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_uses_same_backoff() {
        let transport = ScriptedTransport::new(vec![Err(Error::Transport(
            "Unauthorized".to_string(),
        ))]);
        let mut poll = PollLoop::new(
            transport,
            Arc::new(Recorder::default()),
            PollConfig::default(),
        );
        let cancel = CancellationToken::new();

        assert_eq!(poll.step(&cancel).await, &PollState::ErrorBackoff);
        assert_eq!(poll.cursor().next_offset(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn never_refetches_a_dispatched_id() {
        let transport = ScriptedTransport::new(vec![
            Ok(vec![text_update(1, 1, "a"), text_update(2, 1, "b")]),
            Ok(Vec::new()),
            Err(Error::Network("timeout".to_string())),
            Ok(vec![text_update(3, 1, "c")]),
            Ok(Vec::new()),
        ]);
        let handler = Arc::new(Recorder::default());
        let mut poll = PollLoop::new(transport.clone(), handler.clone(), PollConfig::default());
        let cancel = CancellationToken::new();

        while transport.offsets().len() < 5 {
            poll.step(&cancel).await;
        }

        let offsets = transport.offsets();
        assert_eq!(offsets, vec![0, 3, 3, 3, 4]);
        let mut max_dispatched = -1;
        for (i, &offset) in offsets.iter().enumerate() {
            assert!(offset > max_dispatched, "fetch {i} re-requested id {offset}");
            max_dispatched = match i {
                0 => 2,
                3 => 3,
                _ => max_dispatched,
            };
        }
        assert_eq!(*handler.seen.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn skipped_updates_still_advance_cursor() {
        let transport = ScriptedTransport::new(vec![Ok(vec![
            Update::empty(5),
            text_update(6, 1, "x"),
        ])]);
        let handler = Arc::new(Recorder::default());
        let mut poll = PollLoop::new(transport, handler.clone(), PollConfig::default());
        let cancel = CancellationToken::new();

        poll.step(&cancel).await;
        poll.step(&cancel).await;

        assert_eq!(*handler.seen.lock().unwrap(), vec!["x"]);
        assert_eq!(poll.cursor().next_offset(), 7);
    }

    #[tokio::test]
    async fn echo_scenario_end_to_end() {
        let transport = ScriptedTransport::new(vec![Ok(vec![text_update(42, 7, "hi")])]);
        let (outbox, rx) = Outbox::channel(8);
        let worker = SendWorker::new(transport.clone(), rx, SendWorkerConfig::default())
            .spawn(CancellationToken::new());

        let mut poll = PollLoop::new(
            transport.clone(),
            Arc::new(EchoHandler::new(outbox)),
            PollConfig::default(),
        );
        let cancel = CancellationToken::new();
        poll.step(&cancel).await;
        poll.step(&cancel).await;
        assert_eq!(poll.cursor().next_offset(), 43);

        drop(poll);
        let stats = worker.await.unwrap();
        assert_eq!(stats.delivered, 1);
        assert_eq!(
            *transport.sent.lock().unwrap(),
            vec![(7, "Echo: hi".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_in_flight_fetch() {
        let transport = ScriptedTransport::new(Vec::new());
        let mut poll = PollLoop::new(
            transport.clone(),
            Arc::new(Recorder::default()),
            PollConfig::default(),
        );
        let cancel = CancellationToken::new();

        let stopper = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            stopper.cancel();
        });

        let started = tokio::time::Instant::now();
        poll.run(cancel).await;

        assert_eq!(poll.state(), &PollState::Stopped);
        assert!(started.elapsed() < PollConfig::default().poll_timeout);
        assert_eq!(transport.offsets(), vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff() {
        let transport =
            ScriptedTransport::new(vec![Err(Error::Network("unreachable".to_string()))]);
        let mut poll = PollLoop::new(
            transport,
            Arc::new(Recorder::default()),
            PollConfig {
                error_backoff: Duration::from_secs(3600),
                ..PollConfig::default()
            },
        );
        let cancel = CancellationToken::new();

        assert_eq!(poll.step(&cancel).await, &PollState::ErrorBackoff);
        cancel.cancel();
        assert_eq!(poll.step(&cancel).await, &PollState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_step_keeps_loop_polling() {
        let transport = ScriptedTransport::new(Vec::new());
        let mut poll = PollLoop::new(
            transport.clone(),
            Arc::new(Recorder::default()),
            PollConfig::default(),
        );
        let cancel = CancellationToken::new();

        let res = tokio::time::timeout(Duration::from_secs(1), poll.step(&cancel)).await;
        assert!(res.is_err());
        assert_eq!(poll.state(), &PollState::Polling);

        let res = tokio::time::timeout(Duration::from_secs(1), poll.step(&cancel)).await;
        assert!(res.is_err());
        assert_eq!(transport.offsets(), vec![0, 0]);
    }

    #[tokio::test]
    async fn run_stops_between_batches_when_cancelled() {
        let transport = ScriptedTransport::new(vec![Ok(vec![text_update(1, 1, "bye")])]);
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        let handler = move |_: &Message| stopper.cancel();
        let mut poll = PollLoop::new(transport.clone(), Arc::new(handler), PollConfig::default());

        poll.run(cancel).await;

        assert_eq!(poll.cursor().next_offset(), 2);
        assert_eq!(transport.offsets(), vec![0]);
    }

    #[tokio::test]
    async fn check_latest_returns_newest_message_and_consumes_batch() {
        let transport = ScriptedTransport::new(vec![
            Ok(vec![text_update(3, 1, "old"), text_update(4, 2, "new")]),
            Ok(vec![Update::empty(5)]),
        ]);
        let mut poll = PollLoop::new(
            transport.clone(),
            Arc::new(Recorder::default()),
            PollConfig::default(),
        );

        let latest = poll.check_latest().await.unwrap().unwrap();
        assert_eq!(latest.chat_id, ChatId(2));
        assert_eq!(latest.text.as_deref(), Some("new"));
        assert_eq!(poll.cursor().next_offset(), 5);

        assert!(poll.check_latest().await.unwrap().is_none());
        assert_eq!(poll.cursor().next_offset(), 6);
        assert_eq!(transport.offsets(), vec![0, 5]);
    }

    #[tokio::test]
    async fn check_latest_propagates_errors_without_moving_cursor() {
        let transport =
            ScriptedTransport::new(vec![Err(Error::Transport("Not Found".to_string()))]);
        let mut poll = PollLoop::new(
            transport,
            Arc::new(Recorder::default()),
            PollConfig::default(),
        );

        assert!(poll.check_latest().await.is_err());
        assert_eq!(poll.cursor().next_offset(), 0);
    }
}
