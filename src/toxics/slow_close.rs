use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::stream::{PumpExit, StageStream, Step};

/// Forwards every chunk immediately but holds the output open for `delay`
/// milliseconds after the input side closes. The peer observes a hung
/// half-closed socket.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SlowClose {
    #[serde(default)]
    pub delay: u64,
}

impl SlowClose {
    pub(crate) async fn pump(&self, io: &mut StageStream) -> PumpExit {
        loop {
            match io.recv().await {
                Step::Ready(chunk) => match io.send(chunk).await {
                    Step::Ready(()) => {}
                    Step::Closed => return PumpExit::OutputClosed,
                    Step::Stopped(kind) => return PumpExit::Stopped(kind),
                },
                Step::Closed => {
                    if let Some(kind) = io.sleep(Duration::from_millis(self.delay)).await {
                        return PumpExit::Stopped(kind);
                    }
                    return PumpExit::InputClosed;
                }
                Step::Stopped(kind) => return PumpExit::Stopped(kind),
            }
        }
    }
}
