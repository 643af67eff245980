use tracing::{debug, warn};

use crate::{
    domain::{Batch, UpdateKind},
    errors::Error,
    handler::MessageHandler,
};

/// Per-batch counters, mostly for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub handled: usize,
    pub skipped: usize,
    pub invalid: usize,
}

/// Hand every message in `batch` to `handler`, in received order.
///
/// Updates without a message are skipped; malformed ones are logged and
/// skipped. Neither stops the rest of the batch.
pub fn dispatch<H>(batch: &Batch, handler: &H) -> DispatchReport
where
    H: MessageHandler + ?Sized,
{
    let mut report = DispatchReport::default();

    for update in batch {
        match &update.kind {
            UpdateKind::Message(message) => {
                handler.handle(message);
                report.handled += 1;
            }
            UpdateKind::Other => {
                debug!(update_id = update.id.0, "update without message, skipping");
                report.skipped += 1;
            }
            UpdateKind::Malformed { reason } => {
                let err = Error::Validation(reason.clone());
                warn!(update_id = update.id.0, error = %err, "skipping update");
                report.invalid += 1;
            }
        }
    }

    report
}
