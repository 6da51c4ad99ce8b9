use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error};

use super::InternalEvent;
use crate::bindings::{DecodeError, DecodedPicture, Decoder};

/// A segment to decode.
#[derive(Debug)]
pub(super) struct DecodeJob {
    pub(super) epoch: u64,
    pub(super) index: u64,
    pub(super) duration: f64,
    pub(super) data: Bytes,
}

/// Feeds segments, in order, to the single [`Decoder`] of a player.
///
/// The decoder lives in a dedicated task and decodes on tokio's blocking
/// pool. It is closed when that task ends: once the `DecodeWorker` is dropped,
/// or if decoding panicked.
pub(super) struct DecodeWorker {
    jobs: mpsc::Sender<DecodeJob>,
}

impl DecodeWorker {
    /// `depth` is the maximum amount of segments waiting to be decoded.
    pub(super) fn spawn(
        decoder: Box<dyn Decoder>,
        depth: usize,
        output: mpsc::UnboundedSender<InternalEvent>,
    ) -> Self {
        let (jobs, rx) = mpsc::channel(depth.max(1));
        tokio::spawn(run(DecoderGuard { decoder }, rx, output));
        Self { jobs }
    }

    /// Queue `job`, giving it back if the queue is full or the decoder is gone.
    pub(super) fn submit(&self, job: DecodeJob) -> Result<(), DecodeJob> {
        self.jobs.try_send(job).map_err(|err| match err {
            TrySendError::Full(job) | TrySendError::Closed(job) => job,
        })
    }
}

/// Owns the decoder, closing it when dropped.
struct DecoderGuard {
    decoder: Box<dyn Decoder>,
}

impl DecoderGuard {
    fn decode(&mut self, data: &[u8]) -> Result<Vec<DecodedPicture>, DecodeError> {
        self.decoder.decode(data)
    }
}

impl Drop for DecoderGuard {
    fn drop(&mut self) {
        debug!("Decoder: Closing");
        self.decoder.close();
    }
}

async fn run(
    mut guard: DecoderGuard,
    mut jobs: mpsc::Receiver<DecodeJob>,
    output: mpsc::UnboundedSender<InternalEvent>,
) {
    while let Some(job) = jobs.recv().await {
        let DecodeJob {
            epoch,
            index,
            duration,
            data,
        } = job;
        let outcome = tokio::task::spawn_blocking(move || {
            let result = guard.decode(&data);
            (guard, result)
        })
        .await;
        let result = match outcome {
            Ok((decoder, result)) => {
                guard = decoder;
                result
            }
            Err(err) => {
                // The guard was dropped while unwinding, the decoder is closed.
                error!(index, "Decoder: Decoding task failed: {}", err);
                let _ = output.send(InternalEvent::Decoded {
                    epoch,
                    index,
                    duration,
                    result: Err(DecodeError::DecodeFailed(
                        "The decoder stopped unexpectedly".to_owned(),
                    )),
                });
                return;
            }
        };
        let decoded = InternalEvent::Decoded {
            epoch,
            index,
            duration,
            result,
        };
        if output.send(decoded).is_err() {
            break;
        }
    }
    drop(guard);
    debug!("Decoder: Worker stopped");
}
