//! nettox, a TCP-level fault-injection proxy.
//!
//! Each [`Proxy`] listens on one address and forwards raw bytes to one
//! upstream. Both directions of every connection run through a pipeline
//! of *toxics*: small transformations simulating network pathologies
//! (latency, bandwidth caps, forced timeouts, slow close). Toxics are
//! reconfigured at runtime through the per-direction
//! [`ToxicCollection`]s, and changes take effect on every live
//! connection without dropping it.
//!
//! # Examples
//!
//! ```rust,no_run
//! use nettox::Proxy;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let proxy = Proxy::builder()
//!     .name("redis")
//!     .listen("127.0.0.1:26379")
//!     .upstream("127.0.0.1:6379")
//!     .build();
//! proxy.start().await?;
//!
//! // Add 100ms ± 10ms to everything the client sends.
//! proxy
//!     .up_toxics()
//!     .set_from_json("latency", br#"{"enabled": true, "latency": 100, "jitter": 10}"#)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod collection;
pub mod config;
mod link;
mod stream;
pub mod toxics;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub use collection::ToxicCollection;
pub use toxics::{Toxic, ToxicError, ToxicKind};

/// Builder for configuring a [`Proxy`].
pub struct ProxyBuilder {
    name: String,
    listen: String,
    upstream: String,
    strict: bool,
}

impl ProxyBuilder {
    /// Name used in logs. Defaults to the listen address if unset.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Address to accept client connections on. Port 0 picks a free port.
    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.listen = addr.into();
        self
    }

    /// Address each client connection is paired with.
    pub fn upstream(mut self, addr: impl Into<String>) -> Self {
        self.upstream = addr.into();
        self
    }

    /// Make toxic JSON decoding reject unknown field names.
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    pub fn build(self) -> Proxy {
        let name = if self.name.is_empty() {
            self.listen.clone()
        } else {
            self.name
        };
        Proxy {
            name,
            listen: self.listen,
            upstream: self.upstream,
            up_toxics: ToxicCollection::with_strict("upstream", self.strict),
            down_toxics: ToxicCollection::with_strict("downstream", self.strict),
            running: Mutex::new(None),
        }
    }
}

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// A named listener/upstream pair with one [`ToxicCollection`] per
/// direction.
pub struct Proxy {
    name: String,
    listen: String,
    upstream: String,
    up_toxics: Arc<ToxicCollection>,
    down_toxics: Arc<ToxicCollection>,
    running: Mutex<Option<Running>>,
}

impl Proxy {
    pub fn builder() -> ProxyBuilder {
        ProxyBuilder {
            name: String::new(),
            listen: "127.0.0.1:0".to_string(),
            upstream: String::new(),
            strict: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Toxics applied to client → upstream traffic.
    pub fn up_toxics(&self) -> &Arc<ToxicCollection> {
        &self.up_toxics
    }

    /// Toxics applied to upstream → client traffic.
    pub fn down_toxics(&self) -> &Arc<ToxicCollection> {
        &self.down_toxics
    }

    /// The bound listen address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().unwrap().as_ref().map(|r| r.local_addr)
    }

    /// Bind the listener and start accepting. Returns the bound address.
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        let listener = TcpListener::bind(&self.listen).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(proxy = %self.name, listen = %local_addr, upstream = %self.upstream, "proxy started");

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.name.clone(),
            self.upstream.clone(),
            self.up_toxics.clone(),
            self.down_toxics.clone(),
            shutdown_rx,
        ));

        let mut running = self.running.lock().unwrap();
        if let Some(previous) = running.replace(Running {
            local_addr,
            shutdown: shutdown_tx,
            accept_task,
        }) {
            // Started twice: shut the older accept loop down.
            let _ = previous.shutdown.send(true);
        }
        Ok(local_addr)
    }

    /// Stop accepting new connections. Established connections keep
    /// flowing until either endpoint closes. Idempotent.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap().take();
        if let Some(running) = running {
            let _ = running.shutdown.send(true);
            let _ = running.accept_task.await;
            tracing::info!(proxy = %self.name, "proxy stopped");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    name: String,
    upstream: String,
    up_toxics: Arc<ToxicCollection>,
    down_toxics: Arc<ToxicCollection>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let (client, client_addr) = tokio::select! {
            _ = shutdown.wait_for(|&fired| fired) => return,
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(err) => {
                    tracing::error!(proxy = %name, error = %err, "accept failed");
                    continue;
                }
            },
        };

        let name = name.clone();
        let upstream = upstream.clone();
        let up_toxics = up_toxics.clone();
        let down_toxics = down_toxics.clone();
        tokio::spawn(async move {
            let server = match TcpStream::connect(&upstream).await {
                Ok(server) => server,
                Err(err) => {
                    // Dropping the client socket closes the connection.
                    tracing::error!(proxy = %name, upstream = %upstream, error = %err, "upstream dial failed");
                    return;
                }
            };
            tracing::debug!(proxy = %name, client = %client_addr, "connection opened");

            let (client_read, client_write) = client.into_split();
            let (server_read, server_write) = server.into_split();
            up_toxics
                .start_link(&format!("{client_addr} upstream"), client_read, server_write)
                .await;
            down_toxics
                .start_link(&format!("{client_addr} downstream"), server_read, client_write)
                .await;
        });
    }
}
