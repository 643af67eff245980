use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use echobot_core::{
    config::Config,
    handler::EchoHandler,
    outbox::{Outbox, SendWorker},
    poll::PollLoop,
};
use echobot_telegram::TelegramTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    echobot_core::logging::init("echobot")?;

    let cfg = Config::load()?;

    match std::env::args().nth(1).as_deref() {
        None | Some("run") => run(cfg).await,
        Some("latest") => latest(cfg).await,
        Some(other) => anyhow::bail!("unknown command {other:?} (expected `run` or `latest`)"),
    }
}

/// Poll until Ctrl-C, echoing every text message.
async fn run(cfg: Config) -> anyhow::Result<()> {
    let transport = Arc::new(TelegramTransport::new(&cfg)?);
    let cancel = CancellationToken::new();

    let (outbox, rx) = Outbox::channel(cfg.outbox_capacity);
    let worker = SendWorker::new(transport.clone(), rx, cfg.send_worker_config())
        .spawn(cancel.child_token());

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                return;
            }
            info!("shutdown requested");
            cancel.cancel();
        });
    }

    let mut poll = PollLoop::new(
        transport,
        Arc::new(EchoHandler::new(outbox)),
        cfg.poll_config(),
    );
    poll.run(cancel).await;
    drop(poll);

    let stats = worker.await.context("send worker panicked")?;
    info!(
        delivered = stats.delivered,
        unacknowledged = stats.unacknowledged,
        failed = stats.failed,
        timed_out = stats.timed_out,
        abandoned = stats.abandoned,
        "bye"
    );
    Ok(())
}

/// Print the newest pending message and greet its chat.
async fn latest(cfg: Config) -> anyhow::Result<()> {
    let Some((text, chat_id)) = echobot_telegram::latest_message(&cfg).await? else {
        println!("No new messages");
        return Ok(());
    };

    println!("Latest message: {text}");
    if echobot_telegram::send_reply(&cfg, chat_id, "Hello back!").await? {
        println!("Reply sent!");
    } else {
        warn!(chat_id = chat_id.0, "reply was not acknowledged");
    }
    Ok(())
}
