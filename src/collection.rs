//! The per-direction owner of the toxic pipeline: a fixed table of slots
//! in constant pipeline order (slow_close, latency, bandwidth, timeout),
//! the effective chain with noop sentinels in disabled slots, and the
//! registry of live links running that chain.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{oneshot, Mutex};

use crate::link::{LinkHandle, ToxicLink};
use crate::toxics::{Bandwidth, Latency, SlowClose, Timeout, Toxic, ToxicError, ToxicKind};

/// One direction's toxic collection.
///
/// Configuration changes are serialized on the internal mutex and applied
/// to every live link before the call returns, so between changes the
/// collection's chain and every link's running chain agree slot by slot.
pub struct ToxicCollection {
    direction: &'static str,
    strict: bool,
    shared: Mutex<Shared>,
}

struct Shared {
    /// Slot-ordered toxic configurations. Fixed length, never resized.
    toxics: Vec<Toxic>,
    /// The stage each slot currently runs: the configured toxic when
    /// enabled, the noop sentinel otherwise.
    chain: Vec<ToxicKind>,
    links: HashMap<String, LinkHandle>,
}

impl ToxicCollection {
    pub fn new(direction: &'static str) -> Arc<Self> {
        Self::with_strict(direction, false)
    }

    /// `strict` makes `set_from_json` reject unknown field names instead
    /// of ignoring them.
    pub fn with_strict(direction: &'static str, strict: bool) -> Arc<Self> {
        let toxics = vec![
            Toxic::disabled(ToxicKind::SlowClose(SlowClose::default())),
            Toxic::disabled(ToxicKind::Latency(Latency::default())),
            Toxic::disabled(ToxicKind::Bandwidth(Bandwidth::default())),
            Toxic::disabled(ToxicKind::Timeout(Timeout::default())),
        ];
        let chain = toxics.iter().map(Toxic::stage).collect();
        Arc::new(Self {
            direction,
            strict,
            shared: Mutex::new(Shared {
                toxics,
                chain,
                links: HashMap::new(),
            }),
        })
    }

    pub fn direction(&self) -> &'static str {
        self.direction
    }

    /// Snapshot of every toxic, keyed by name.
    pub async fn list(&self) -> HashMap<String, Toxic> {
        let shared = self.shared.lock().await;
        shared
            .toxics
            .iter()
            .map(|toxic| (toxic.name().to_string(), toxic.clone()))
            .collect()
    }

    pub async fn get(&self, name: &str) -> Result<Toxic, ToxicError> {
        let shared = self.shared.lock().await;
        let slot = slot_of(&shared.toxics, name)?;
        Ok(shared.toxics[slot].clone())
    }

    /// Decode a JSON payload into the named toxic's configuration and
    /// apply it to every live link. The payload patches the current
    /// configuration; absent fields keep their values.
    pub async fn set_from_json(&self, name: &str, data: &[u8]) -> Result<Toxic, ToxicError> {
        let mut shared = self.shared.lock().await;
        let slot = slot_of(&shared.toxics, name)?;
        let updated = shared.toxics[slot].merge_json(data, self.strict)?;
        shared.toxics[slot] = updated.clone();
        self.apply_one(&mut shared, slot).await;
        Ok(updated)
    }

    /// Replace the matching toxic's configuration from an in-memory value
    /// and apply it to every live link.
    pub async fn set(&self, toxic: Toxic) -> Result<Toxic, ToxicError> {
        let mut shared = self.shared.lock().await;
        let slot = slot_of(&shared.toxics, toxic.name())?;
        shared.toxics[slot] = toxic.clone();
        self.apply_one(&mut shared, slot).await;
        Ok(toxic)
    }

    /// Disable every toxic. Parameters are kept for a future enable.
    pub async fn reset(&self) {
        let mut shared = self.shared.lock().await;
        for slot in 0..shared.toxics.len() {
            shared.toxics[slot].enabled = false;
            self.apply_one(&mut shared, slot).await;
        }
    }

    /// Bind a (reader, writer) pair to a fresh link running the current
    /// chain. The snapshot is taken under the lock, so the link observes
    /// either the state before or after any concurrent change, plus that
    /// change's swap command in its inbox.
    ///
    /// Names are chosen by the caller (conventionally
    /// `"{remote_addr} {direction}"`); registering a duplicate replaces
    /// the previous entry, which keeps running but becomes unreachable
    /// for reconfiguration.
    pub async fn start_link<R, W>(self: &Arc<Self>, name: &str, reader: R, writer: W)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut shared = self.shared.lock().await;
        let handle = ToxicLink::start(
            name,
            self.direction,
            reader,
            writer,
            shared.chain.clone(),
            Arc::downgrade(self),
        );
        if shared.links.insert(name.to_string(), handle).is_some() {
            tracing::debug!(link = name, direction = self.direction, "replaced link registration");
        }
    }

    /// Drop the registry entry. The link itself stops when its I/O ends.
    pub async fn remove_link(&self, name: &str) {
        self.shared.lock().await.links.remove(name);
    }

    /// Called by a terminating link. The id check keeps a displaced link
    /// from removing the entry of a successor registered under its name.
    pub(crate) async fn unregister(&self, name: &str, id: u64) {
        let mut shared = self.shared.lock().await;
        if shared.links.get(name).is_some_and(|link| link.id() == id) {
            shared.links.remove(name);
        }
    }

    /// Install slot `slot`'s new stage into the chain and into every live
    /// link. Commands go out to all links before any acknowledgement is
    /// awaited, so the total wait is bounded by the slowest link rather
    /// than the sum: a link mid-sleep in a latency stage must not stall
    /// reconfiguration of every other connection behind it.
    async fn apply_one(&self, shared: &mut Shared, slot: usize) {
        let stage = shared.toxics[slot].stage();
        shared.chain[slot] = stage.clone();

        let mut acks = Vec::with_capacity(shared.links.len());
        for link in shared.links.values() {
            let (ack_tx, ack_rx) = oneshot::channel();
            // A closed command channel means the link already terminated;
            // skip it, its registry entry is on its way out.
            if link.swap(slot, stage.clone(), ack_tx).is_ok() {
                acks.push(ack_rx);
            }
        }
        for ack in acks {
            // A dropped ack means the link died mid-swap. Also fine.
            let _ = ack.await;
        }

        tracing::debug!(
            direction = self.direction,
            slot,
            toxic = stage.name(),
            "applied toxic"
        );
    }
}

fn slot_of(toxics: &[Toxic], name: &str) -> Result<usize, ToxicError> {
    toxics
        .iter()
        .position(|toxic| toxic.name() == name)
        .ok_or_else(|| ToxicError::UnknownToxic(name.to_string()))
}
