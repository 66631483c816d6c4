use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::stream::{PumpExit, StageStream, Step};

use super::Noop;

/// Forwards normally until `timeout` milliseconds after the first byte,
/// then severs the stream: the output closes and any further input is
/// discarded. A timeout of 0 never fires.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timeout {
    #[serde(default)]
    pub timeout: u64,
}

impl Timeout {
    pub(crate) async fn pump(&self, io: &mut StageStream) -> PumpExit {
        if self.timeout == 0 {
            return Noop::default().pump(io).await;
        }

        let mut deadline: Option<Instant> = None;
        loop {
            let step = match deadline {
                None => io.recv().await,
                Some(deadline) => match tokio::time::timeout_at(deadline, io.recv()).await {
                    Ok(step) => step,
                    Err(_) => {
                        io.close_output();
                        return self.discard(io).await;
                    }
                },
            };
            match step {
                Step::Ready(chunk) => {
                    deadline
                        .get_or_insert(chunk.timestamp + Duration::from_millis(self.timeout));
                    match io.send(chunk).await {
                        Step::Ready(()) => {}
                        Step::Closed => return PumpExit::OutputClosed,
                        Step::Stopped(kind) => return PumpExit::Stopped(kind),
                    }
                }
                Step::Closed => return PumpExit::InputClosed,
                Step::Stopped(kind) => return PumpExit::Stopped(kind),
            }
        }
    }

    /// After the deadline fires, keep draining input so the upstream
    /// stage is never blocked on a full channel.
    async fn discard(&self, io: &mut StageStream) -> PumpExit {
        loop {
            match io.recv().await {
                Step::Ready(_) => {}
                Step::Closed => return PumpExit::InputClosed,
                Step::Stopped(kind) => return PumpExit::Stopped(kind),
            }
        }
    }
}
