//! Request intake
//!
//! Turns the shared queue into a lazy sequence of decoded execution
//! requests. The scheduler pulls one at a time, so at most one frame is in
//! flight here and the queue is never drained into local memory while the
//! pool is at capacity.
//!
//! Per frame: pop, authenticated-decrypt, decode, normalize. A frame that
//! fails any step is dropped with a counter increment; intake itself never
//! stops for a bad frame.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::crypto::FrameCrypto;
use crate::metrics::WorkerMetrics;
use crate::protocol::{self, ExecuteRequest};
use crate::queue::RequestQueue;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CRYPTO_WARN_THRESHOLD: usize = 5;
const CRYPTO_WARN_WINDOW: Duration = Duration::from_secs(60);

/// One admission step's outcome.
pub enum Intake {
    Request(ExecuteRequest),
    /// Empty poll or dropped frame; lets the scheduler loop make progress
    /// without busy-spinning.
    Tick,
    /// Shutdown observed; the sequence is finished.
    Closed,
}

pub struct RequestIntake {
    queue: Arc<dyn RequestQueue>,
    crypto: FrameCrypto,
    metrics: Arc<WorkerMetrics>,
    shutdown: watch::Receiver<bool>,
    recent_crypto_failures: Vec<Instant>,
}

impl RequestIntake {
    pub fn new(
        queue: Arc<dyn RequestQueue>,
        crypto: FrameCrypto,
        metrics: Arc<WorkerMetrics>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            queue,
            crypto,
            metrics,
            shutdown,
            recent_crypto_failures: Vec::new(),
        }
    }

    pub async fn next(&mut self) -> Intake {
        if *self.shutdown.borrow() {
            return Intake::Closed;
        }

        let frame = match self.queue.pop().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tokio::time::sleep(POLL_INTERVAL).await;
                return Intake::Tick;
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "request queue pop failed, backing off");
                tokio::time::sleep(POLL_INTERVAL).await;
                return Intake::Tick;
            }
        };

        let plaintext = match self.crypto.open(&frame) {
            Ok(plaintext) => plaintext,
            Err(err) => {
                self.metrics.inc_frames_dropped();
                self.metrics.inc_crypto_failures();
                self.note_crypto_failure();
                debug!(error = %err, "dropping undecryptable request frame");
                return Intake::Tick;
            }
        };

        match protocol::decode_request(&plaintext) {
            Ok(request) => Intake::Request(request),
            Err(err) => {
                self.metrics.inc_frames_dropped();
                debug!(error = %err, "dropping malformed request frame");
                Intake::Tick
            }
        }
    }

    fn note_crypto_failure(&mut self) {
        let now = Instant::now();
        self.recent_crypto_failures
            .retain(|t| now.duration_since(*t) < CRYPTO_WARN_WINDOW);
        self.recent_crypto_failures.push(now);
        if self.recent_crypto_failures.len() >= CRYPTO_WARN_THRESHOLD {
            warn!(
                failures = self.recent_crypto_failures.len(),
                window_secs = CRYPTO_WARN_WINDOW.as_secs(),
                "repeated request-frame decrypt failures; check key material on both ends"
            );
        }
    }
}
