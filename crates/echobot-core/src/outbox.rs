//! Fire-and-forget reply delivery.
//!
//! Handlers push [`OutboundMessage`]s into an [`Outbox`] and return
//! immediately. A single [`SendWorker`] drains the queue and runs each send as
//! its own task, with bounded concurrency and a per-send deadline. Send results
//! are logged and counted, never reported back to the poll loop.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{mpsc, OwnedSemaphorePermit, Semaphore},
    task::{JoinHandle, JoinSet},
    time::{timeout, timeout_at, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{domain::ChatId, ports::Transport};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub chat_id: ChatId,
    pub text: String,
}

/// Producer side of the reply queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Outbox {
    tx: mpsc::Sender<OutboundMessage>,
}

impl Outbox {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Queue a reply without waiting. Returns `false` if it was dropped
    /// because the queue is full or the worker is gone.
    pub fn enqueue(&self, msg: OutboundMessage) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                warn!(chat_id = msg.chat_id.0, "outbox full, dropping reply");
                false
            }
            Err(mpsc::error::TrySendError::Closed(msg)) => {
                warn!(chat_id = msg.chat_id.0, "send worker stopped, dropping reply");
                false
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct SendWorkerConfig {
    /// Maximum sends in flight at once.
    pub concurrency: usize,
    /// Upper bound on a single send, including connection setup.
    pub send_timeout: Duration,
    /// How long to keep delivering already-queued replies after cancellation.
    pub shutdown_grace: Duration,
}

impl Default for SendWorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            send_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Counters reported when the worker exits.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendStats {
    pub delivered: u64,
    pub unacknowledged: u64,
    pub failed: u64,
    pub timed_out: u64,
    /// Replies still queued or in flight when the shutdown grace period ran
    /// out.
    pub abandoned: u64,
}

#[derive(Clone, Copy, Debug)]
enum SendOutcome {
    Delivered,
    Unacknowledged,
    Failed,
    TimedOut,
}

impl SendStats {
    fn record(&mut self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Delivered => self.delivered += 1,
            SendOutcome::Unacknowledged => self.unacknowledged += 1,
            SendOutcome::Failed => self.failed += 1,
            SendOutcome::TimedOut => self.timed_out += 1,
        }
    }
}

pub struct SendWorker {
    transport: Arc<dyn Transport>,
    rx: mpsc::Receiver<OutboundMessage>,
    cfg: SendWorkerConfig,
    permits: Arc<Semaphore>,
    tasks: JoinSet<SendOutcome>,
    stats: SendStats,
}

impl SendWorker {
    pub fn new(
        transport: Arc<dyn Transport>,
        rx: mpsc::Receiver<OutboundMessage>,
        cfg: SendWorkerConfig,
    ) -> Self {
        Self {
            transport,
            rx,
            permits: Arc::new(Semaphore::new(cfg.concurrency.max(1))),
            cfg,
            tasks: JoinSet::new(),
            stats: SendStats::default(),
        }
    }

    /// Run on a background task until `cancel` fires or every [`Outbox`] is
    /// dropped.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<SendStats> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) -> SendStats {
        let mut carried = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = self.rx.recv() => match next {
                    Some(msg) => {
                        self.reap_finished();
                        // A full pool must not hold off cancellation.
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                carried = Some(msg);
                                break;
                            }
                            permit = self.permits.clone().acquire_owned() => {
                                if let Ok(permit) = permit {
                                    self.start_send(msg, permit);
                                }
                            }
                        }
                    }
                    None => break,
                },
            }
        }

        self.shutdown(carried).await;
        info!(
            delivered = self.stats.delivered,
            failed = self.stats.failed + self.stats.timed_out,
            abandoned = self.stats.abandoned,
            "send worker stopped"
        );
        self.stats
    }

    fn start_send(&mut self, msg: OutboundMessage, permit: OwnedSemaphorePermit) {
        let transport = self.transport.clone();
        let send_timeout = self.cfg.send_timeout;

        self.tasks.spawn(async move {
            let _permit = permit;
            let chat_id = msg.chat_id.0;
            match timeout(send_timeout, transport.send_message(msg.chat_id, &msg.text)).await {
                Ok(Ok(true)) => {
                    debug!(chat_id, "reply delivered");
                    SendOutcome::Delivered
                }
                Ok(Ok(false)) => {
                    warn!(chat_id, "reply not acknowledged by endpoint");
                    SendOutcome::Unacknowledged
                }
                Ok(Err(e)) => {
                    warn!(chat_id, error = %e, "reply failed");
                    SendOutcome::Failed
                }
                Err(_) => {
                    warn!(chat_id, ?send_timeout, "reply timed out");
                    SendOutcome::TimedOut
                }
            }
        });
    }

    fn reap_finished(&mut self) {
        while let Some(res) = self.tasks.try_join_next() {
            if let Ok(outcome) = res {
                self.stats.record(outcome);
            }
        }
    }

    /// Best-effort drain: deliver what is already queued and wait for in-flight
    /// sends, all within one grace window. Replies that never got a send slot
    /// before the deadline count as abandoned.
    async fn shutdown(&mut self, carried: Option<OutboundMessage>) {
        self.rx.close();
        let deadline = Instant::now() + self.cfg.shutdown_grace;
        let mut next = carried;

        loop {
            let msg = match next.take() {
                Some(msg) => msg,
                None => match timeout_at(deadline, self.rx.recv()).await {
                    Ok(Some(msg)) => msg,
                    Ok(None) | Err(_) => break,
                },
            };
            match timeout_at(deadline, self.permits.clone().acquire_owned()).await {
                Ok(Ok(permit)) => self.start_send(msg, permit),
                Ok(Err(_)) | Err(_) => {
                    self.stats.abandoned += 1;
                    break;
                }
            }
        }
        while self.rx.try_recv().is_ok() {
            self.stats.abandoned += 1;
        }

        loop {
            match timeout_at(deadline, self.tasks.join_next()).await {
                Ok(Some(Ok(outcome))) => self.stats.record(outcome),
                Ok(Some(Err(_))) => {}
                Ok(None) => break,
                Err(_) => {
                    self.stats.abandoned += self.tasks.len() as u64;
                    self.tasks.abort_all();
                    break;
                }
            }
        }
    }
}
