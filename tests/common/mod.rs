#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use nettox::Proxy;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Start an echo server that reports every received line on a channel
/// before echoing it, so tests can timestamp the server-side read
/// independently of the reply path.
pub async fn start_echo_server() -> (SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (lines_tx, lines_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let lines_tx = lines_tx.clone();
            tokio::spawn(async move {
                let mut pending = Vec::new();
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            pending.extend_from_slice(&buf[..n]);
                            while let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                                let line: Vec<u8> = pending.drain(..=pos).collect();
                                let _ = lines_tx.send(line.clone());
                                if socket.write_all(&line).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                }
            });
        }
    });

    (addr, lines_rx)
}

pub struct EchoFixture {
    pub proxy: Proxy,
    pub addr: SocketAddr,
    /// Lines as the upstream server read them.
    pub server_lines: mpsc::UnboundedReceiver<Vec<u8>>,
}

/// A proxy in front of a fresh echo server.
pub async fn start_echo_proxy(name: &str) -> EchoFixture {
    let (upstream, server_lines) = start_echo_server().await;
    let proxy = Proxy::builder()
        .name(name)
        .listen("127.0.0.1:0")
        .upstream(upstream.to_string())
        .build();
    let addr = proxy.start().await.unwrap();
    EchoFixture {
        proxy,
        addr,
        server_lines,
    }
}

pub async fn connect(addr: SocketAddr) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

/// Write a payload and read back the echo, asserting byte equality.
pub async fn echo_exchange(conn: &mut TcpStream, payload: &[u8]) {
    conn.write_all(payload).await.unwrap();
    let mut echoed = vec![0u8; payload.len()];
    conn.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload, "echo did not match payload");
}

pub fn assert_delta_time(message: &str, actual: Duration, expected: Duration, delta: Duration) {
    let diff = if actual > expected {
        actual - expected
    } else {
        expected - actual
    };
    assert!(
        diff <= delta,
        "[{message}] time was more than {delta:?} off: got {actual:?}, expected {expected:?}"
    );
}

/// A newline-terminated payload of `size` filler bytes.
pub fn test_payload(size: usize) -> Vec<u8> {
    let mut payload = b"hello world ".to_vec();
    payload.extend(std::iter::repeat(b'a').take(size));
    payload.push(b'\n');
    payload
}
