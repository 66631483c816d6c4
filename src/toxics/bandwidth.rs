use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::stream::{Chunk, PumpExit, StageStream, Step};

use super::Noop;

/// Caps throughput at `rate` kilobits per second.
///
/// Chunks larger than the remaining budget are split; the permitted
/// prefix goes out immediately and the rest waits for the meter to catch
/// up. Splits preserve byte order and total bytes. A rate of 0 means
/// unlimited.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Bandwidth {
    #[serde(default)]
    pub rate: u64,
}

impl Bandwidth {
    pub(crate) async fn pump(&self, io: &mut StageStream) -> PumpExit {
        if self.rate == 0 {
            return Noop::default().pump(io).await;
        }

        let bytes_per_sec = self.rate * 1024 / 8;
        // Release at most 100ms of budget per slice so a big chunk never
        // turns into one long uninterruptible burst-and-sleep.
        let max_slice = (bytes_per_sec / 10).max(1) as usize;

        let mut next_due = Instant::now();

        loop {
            let mut chunk = match io.recv().await {
                Step::Ready(chunk) => chunk,
                Step::Closed => return PumpExit::InputClosed,
                Step::Stopped(kind) => return PumpExit::Stopped(kind),
            };
            while !chunk.data.is_empty() {
                let take = chunk.data.len().min(max_slice);
                let slice = Chunk {
                    data: chunk.data.split_to(take),
                    timestamp: chunk.timestamp,
                };

                // Idle gaps earn no credit; otherwise a quiet stream
                // could burst far past the cap when traffic resumes.
                let now = Instant::now();
                if next_due < now {
                    next_due = now;
                }
                if let Some(kind) = io.sleep_until(next_due).await {
                    return PumpExit::Stopped(kind);
                }
                next_due += Duration::from_secs_f64(take as f64 / bytes_per_sec as f64);

                match io.send(slice).await {
                    Step::Ready(()) => {}
                    Step::Closed => return PumpExit::OutputClosed,
                    Step::Stopped(kind) => return PumpExit::Stopped(kind),
                }
            }
        }
    }
}
