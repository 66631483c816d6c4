//! The per-connection, per-direction running instance of a toxic chain:
//! a reader task feeding chunks into the pipeline, one worker per slot,
//! a writer task draining the tail, and a supervisor that swaps single
//! stages in place when the collection reconfigures a slot.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Weak;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::collection::ToxicCollection;
use crate::stream::{Chunk, PumpExit, StageStream, StopKind, StopListener, CHANNEL_CAPACITY};
use crate::toxics::ToxicKind;

const READ_BUFFER_SIZE: usize = 32 * 1024;

static NEXT_LINK_ID: AtomicU64 = AtomicU64::new(0);

/// Command from the collection: replace slot `slot`'s stage with `stage`
/// and acknowledge once the replacement is running.
pub(crate) struct SwapCommand {
    pub(crate) slot: usize,
    pub(crate) stage: ToxicKind,
    pub(crate) ack: oneshot::Sender<()>,
}

/// The collection's handle to a running link. The id distinguishes
/// same-named links so a dying, displaced link cannot deregister its
/// successor.
pub(crate) struct LinkHandle {
    id: u64,
    commands: mpsc::Sender<SwapCommand>,
}

impl LinkHandle {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Queue a swap command. Fails if the link has already terminated.
    pub(crate) fn swap(
        &self,
        slot: usize,
        stage: ToxicKind,
        ack: oneshot::Sender<()>,
    ) -> Result<(), ()> {
        self.commands
            .try_send(SwapCommand { slot, stage, ack })
            .map_err(|_| ())
    }
}

/// Endpoints handed back by a worker stopped for reconfiguration. The
/// sender is `None` if the outgoing stage had already closed its output.
type StageChannels = (mpsc::Receiver<Chunk>, Option<mpsc::Sender<Chunk>>);

struct Stage {
    swap: watch::Sender<bool>,
    worker: JoinHandle<Option<StageChannels>>,
}

pub(crate) struct ToxicLink {
    name: String,
    direction: &'static str,
    id: u64,
    collection: Weak<ToxicCollection>,
    stages: Vec<Option<Stage>>,
    shutdown: watch::Sender<bool>,
}

impl ToxicLink {
    /// Wire up the pipeline for one direction of one connection and start
    /// all of its tasks. The chain snapshot must be taken under the
    /// collection lock so the link starts consistent with the slot table.
    pub(crate) fn start<R, W>(
        name: &str,
        direction: &'static str,
        reader: R,
        writer: W,
        chain: Vec<ToxicKind>,
        collection: Weak<ToxicCollection>,
    ) -> LinkHandle
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = NEXT_LINK_ID.fetch_add(1, Ordering::Relaxed);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // K+1 channels: reader -> stage 0 -> ... -> stage K-1 -> writer.
        let (head_tx, mut next_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let mut stages = Vec::with_capacity(chain.len());
        for kind in chain {
            let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
            stages.push(Some(spawn_stage(
                kind,
                next_rx,
                Some(tx),
                shutdown_rx.clone(),
            )));
            next_rx = rx;
        }

        let reader_task = tokio::spawn(run_reader(reader, head_tx, shutdown_rx.clone()));
        let writer_task = tokio::spawn(run_writer(writer, next_rx, shutdown_rx));

        let (cmd_tx, cmd_rx) = mpsc::channel(1);
        let link = ToxicLink {
            name: name.to_string(),
            direction,
            id,
            collection,
            stages,
            shutdown: shutdown_tx,
        };
        tokio::spawn(link.run(cmd_rx, reader_task, writer_task));

        LinkHandle {
            id,
            commands: cmd_tx,
        }
    }

    /// Supervisor loop: serve swap commands until the writer finishes,
    /// then tear everything down and deregister.
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SwapCommand>,
        reader: JoinHandle<()>,
        mut writer: JoinHandle<io::Result<()>>,
    ) {
        loop {
            tokio::select! {
                result = &mut writer => {
                    self.log_writer_exit(result);
                    break;
                }
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.handle_swap(cmd).await,
                    None => {
                        // The collection dropped its handle; keep moving
                        // bytes until the connection itself ends.
                        self.log_writer_exit((&mut writer).await);
                        break;
                    }
                },
            }
        }

        // Fail any queued acks before touching the collection lock, which
        // the fan-out may be holding while it waits on us.
        drop(commands);
        let _ = self.shutdown.send(true);
        for stage in self.stages.drain(..).flatten() {
            let _ = stage.worker.await;
        }
        let _ = reader.await;

        if let Some(collection) = self.collection.upgrade() {
            collection.unregister(&self.name, self.id).await;
        }
        tracing::debug!(link = %self.name, direction = self.direction, "link terminated");
    }

    /// Replace one slot's worker while its neighbors keep running. The
    /// channels on either side of the slot are preserved, so buffered
    /// chunks stay in place.
    async fn handle_swap(&mut self, cmd: SwapCommand) {
        let SwapCommand { slot, stage, ack } = cmd;
        if let Some(running) = self.stages[slot].take() {
            let _ = running.swap.send(true);
            match running.worker.await {
                Ok(Some((rx, tx))) => {
                    tracing::debug!(
                        link = %self.name,
                        direction = self.direction,
                        slot,
                        toxic = stage.name(),
                        "stage swapped"
                    );
                    self.stages[slot] =
                        Some(spawn_stage(stage, rx, tx, self.shutdown.subscribe()));
                }
                Ok(None) => {
                    // The worker had already drained; the link is closing
                    // and there is nothing left to install into.
                }
                Err(err) => {
                    tracing::error!(
                        link = %self.name,
                        direction = self.direction,
                        slot,
                        error = %err,
                        "stage worker panicked, shutting link down"
                    );
                    let _ = self.shutdown.send(true);
                }
            }
        }
        let _ = ack.send(());
    }

    fn log_writer_exit(&self, result: Result<io::Result<()>, tokio::task::JoinError>) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(link = %self.name, direction = self.direction, error = %err, "link write failed");
            }
            Err(err) => {
                tracing::error!(link = %self.name, direction = self.direction, error = %err, "writer task failed");
            }
        }
    }
}

fn spawn_stage(
    kind: ToxicKind,
    rx: mpsc::Receiver<Chunk>,
    tx: Option<mpsc::Sender<Chunk>>,
    shutdown: watch::Receiver<bool>,
) -> Stage {
    let (swap_tx, swap_rx) = watch::channel(false);
    let mut io = StageStream::new(rx, tx, StopListener::new(swap_rx, shutdown));
    let worker = tokio::spawn(async move {
        match kind.pump(&mut io).await {
            // Stopped for reconfiguration: hand the endpoints back intact.
            PumpExit::Stopped(StopKind::Swap) => Some(io.into_channels()),
            // Natural drain or link shutdown: dropping the sender closes
            // the downstream channel, dropping the receiver unblocks the
            // upstream stage.
            PumpExit::InputClosed
            | PumpExit::OutputClosed
            | PumpExit::Stopped(StopKind::Shutdown) => None,
        }
    });
    Stage {
        swap: swap_tx,
        worker,
    }
}

/// Read from the underlying source, stamp each buffer with its arrival
/// time, and feed it into the head of the chain. Dropping the sender on
/// exit is what propagates EOF through the pipeline.
async fn run_reader<R>(mut reader: R, tx: mpsc::Sender<Chunk>, mut shutdown: watch::Receiver<bool>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let read = tokio::select! {
            _ = shutdown.wait_for(|&fired| fired) => return,
            read = reader.read_buf(&mut buf) => read,
        };
        match read {
            Ok(0) => return,
            Ok(_) => {
                let chunk = Chunk::new(buf.freeze());
                let sent = tokio::select! {
                    _ = shutdown.wait_for(|&fired| fired) => return,
                    sent = tx.send(chunk) => sent,
                };
                if sent.is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "link read failed");
                return;
            }
        }
    }
}

/// Drain the tail of the chain into the underlying sink. When the chain
/// closes, shut the sink down so the peer observes a half-close.
async fn run_writer<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Chunk>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let chunk = tokio::select! {
            _ = shutdown.wait_for(|&fired| fired) => return Ok(()),
            chunk = rx.recv() => chunk,
        };
        let Some(chunk) = chunk else {
            return writer.shutdown().await;
        };
        tokio::select! {
            _ = shutdown.wait_for(|&fired| fired) => return Ok(()),
            written = writer.write_all(&chunk.data) => written?,
        }
    }
}
