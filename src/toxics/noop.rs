use serde::{Deserialize, Serialize};

use crate::stream::{PumpExit, StageStream, Step};

/// Pure passthrough. Also the sentinel that fills disabled slots so the
/// chain length never changes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Noop {}

impl Noop {
    pub(crate) async fn pump(&self, io: &mut StageStream) -> PumpExit {
        loop {
            let chunk = match io.recv().await {
                Step::Ready(chunk) => chunk,
                Step::Closed => return PumpExit::InputClosed,
                Step::Stopped(kind) => return PumpExit::Stopped(kind),
            };
            match io.send(chunk).await {
                Step::Ready(()) => {}
                Step::Closed => return PumpExit::OutputClosed,
                Step::Stopped(kind) => return PumpExit::Stopped(kind),
            }
        }
    }
}
