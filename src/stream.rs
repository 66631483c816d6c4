//! Plumbing shared by every stage of a link: the chunk type that carries
//! traffic, the channel/stop-signal bundle a toxic pumps through, and the
//! vocabulary for why a pump returned.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

/// Chunks buffered between adjacent stages. Bounds per-link memory while
/// still letting stages run ahead of each other.
pub(crate) const CHANNEL_CAPACITY: usize = 32;

/// One unit of traffic inside a link: a byte buffer plus the instant the
/// reader pulled it off the socket. Bandwidth and latency stages key their
/// timing off the timestamp.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub data: Bytes,
    pub timestamp: Instant,
}

impl Chunk {
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            timestamp: Instant::now(),
        }
    }
}

/// Which stop signal interrupted a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopKind {
    /// The slot is being reconfigured; the worker hands its channel
    /// endpoints back so the replacement stage inherits buffered chunks.
    Swap,
    /// The whole link is going away; drop everything.
    Shutdown,
}

/// Why a pump returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PumpExit {
    InputClosed,
    OutputClosed,
    Stopped(StopKind),
}

/// Outcome of one cancellable channel operation.
pub(crate) enum Step<T> {
    Ready(T),
    Closed,
    Stopped(StopKind),
}

/// Listens on both stop signals a stage is subject to: the per-slot swap
/// signal and the link-wide shutdown signal.
pub(crate) struct StopListener {
    swap: watch::Receiver<bool>,
    shutdown: watch::Receiver<bool>,
}

impl StopListener {
    pub(crate) fn new(swap: watch::Receiver<bool>, shutdown: watch::Receiver<bool>) -> Self {
        Self { swap, shutdown }
    }

    /// Resolves when either signal fires. A dropped sender counts as
    /// shutdown: the side that owned it is gone.
    pub(crate) async fn stopped(&mut self) -> StopKind {
        tokio::select! {
            _ = self.shutdown.wait_for(|&fired| fired) => StopKind::Shutdown,
            res = self.swap.wait_for(|&fired| fired) => match res {
                Ok(_) => StopKind::Swap,
                Err(_) => StopKind::Shutdown,
            },
        }
    }
}

/// The pair of channel endpoints a stage runs between, bundled with its
/// stop listener. Every blocking operation a pump performs goes through
/// here so that all of them are selectable against the stop signals.
pub(crate) struct StageStream {
    rx: mpsc::Receiver<Chunk>,
    /// `None` once a stage has closed its output early (timeout).
    tx: Option<mpsc::Sender<Chunk>>,
    stop: StopListener,
}

impl StageStream {
    pub(crate) fn new(
        rx: mpsc::Receiver<Chunk>,
        tx: Option<mpsc::Sender<Chunk>>,
        stop: StopListener,
    ) -> Self {
        Self { rx, tx, stop }
    }

    /// Receive the next chunk from the upstream stage. Biased toward the
    /// stop signal: a stopping stage takes no new work, leaving buffered
    /// chunks in place for its replacement.
    pub(crate) async fn recv(&mut self) -> Step<Chunk> {
        tokio::select! {
            biased;
            kind = self.stop.stopped() => Step::Stopped(kind),
            chunk = self.rx.recv() => match chunk {
                Some(chunk) => Step::Ready(chunk),
                None => Step::Closed,
            },
        }
    }

    /// Forward a chunk to the downstream stage. Biased toward the send:
    /// a chunk already in hand is only abandoned if the channel cannot
    /// accept it right now, never because a stop signal happened to win
    /// a race against a send that would have succeeded.
    pub(crate) async fn send(&mut self, chunk: Chunk) -> Step<()> {
        let Some(tx) = &self.tx else {
            return Step::Closed;
        };
        tokio::select! {
            biased;
            sent = tx.send(chunk) => match sent {
                Ok(()) => Step::Ready(()),
                Err(_) => Step::Closed,
            },
            kind = self.stop.stopped() => Step::Stopped(kind),
        }
    }

    /// Interruptible sleep. A stop signal wakes it immediately; a sleep
    /// whose time has already passed completes rather than losing a race
    /// against a concurrent stop.
    pub(crate) async fn sleep(&mut self, duration: Duration) -> Option<StopKind> {
        if duration.is_zero() {
            return None;
        }
        tokio::select! {
            biased;
            () = tokio::time::sleep(duration) => None,
            kind = self.stop.stopped() => Some(kind),
        }
    }

    /// Interruptible sleep until an absolute deadline.
    pub(crate) async fn sleep_until(&mut self, deadline: Instant) -> Option<StopKind> {
        tokio::select! {
            biased;
            () = tokio::time::sleep_until(deadline) => None,
            kind = self.stop.stopped() => Some(kind),
        }
    }

    /// Drop the output sender, closing the downstream channel once any
    /// buffered chunks drain. Subsequent `send` calls report `Closed`.
    pub(crate) fn close_output(&mut self) {
        self.tx = None;
    }

    /// Tear the stream apart so a replacement stage can be spawned over
    /// the same channel endpoints.
    pub(crate) fn into_channels(self) -> (mpsc::Receiver<Chunk>, Option<mpsc::Sender<Chunk>>) {
        (self.rx, self.tx)
    }
}
