use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::stream::{PumpExit, StageStream, Step};

/// Delays each chunk by `latency` ± `jitter` milliseconds before
/// forwarding it. The delay is sampled per chunk from a uniform
/// distribution, clamped at zero.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Latency {
    #[serde(default)]
    pub latency: u64,
    #[serde(default)]
    pub jitter: u64,
}

impl Latency {
    fn delay(&self) -> Duration {
        if self.jitter == 0 {
            return Duration::from_millis(self.latency);
        }
        let low = self.latency.saturating_sub(self.jitter);
        let high = self.latency + self.jitter;
        Duration::from_millis(rand::rng().random_range(low..=high))
    }

    pub(crate) async fn pump(&self, io: &mut StageStream) -> PumpExit {
        loop {
            let chunk = match io.recv().await {
                Step::Ready(chunk) => chunk,
                Step::Closed => return PumpExit::InputClosed,
                Step::Stopped(kind) => return PumpExit::Stopped(kind),
            };
            // Delay relative to arrival, so chunks queued behind a
            // sleeping predecessor only wait out the remainder instead of
            // stacking full delays.
            //
            // A stop during the sleep abandons the in-flight chunk.
            if let Some(kind) = io.sleep_until(chunk.timestamp + self.delay()).await {
                return PumpExit::Stopped(kind);
            }
            match io.send(chunk).await {
                Step::Ready(()) => {}
                Step::Closed => return PumpExit::OutputClosed,
                Step::Stopped(kind) => return PumpExit::Stopped(kind),
            }
        }
    }
}
