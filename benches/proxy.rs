use std::net::SocketAddr;

use criterion::{criterion_group, criterion_main, Criterion};
use nettox::Proxy;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;

async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

async fn start_proxy(zero_valued_toxics: bool) -> SocketAddr {
    let upstream = start_echo_server().await;
    let proxy = Proxy::builder()
        .name("bench")
        .listen("127.0.0.1:0")
        .upstream(upstream.to_string())
        .build();
    let addr = proxy.start().await.unwrap();

    if zero_valued_toxics {
        for (name, payload) in [
            ("slow_close", r#"{"enabled": true, "delay": 0}"#),
            ("latency", r#"{"enabled": true, "latency": 0, "jitter": 0}"#),
            ("bandwidth", r#"{"enabled": true, "rate": 0}"#),
            ("timeout", r#"{"enabled": true, "timeout": 0}"#),
        ] {
            proxy
                .up_toxics()
                .set_from_json(name, payload.as_bytes())
                .await
                .unwrap();
        }
    }

    // Leak so the accept loop outlives this function.
    std::mem::forget(proxy);
    addr
}

async fn round_trip(conn: &mut TcpStream, payload: &[u8], scratch: &mut [u8]) {
    conn.write_all(payload).await.unwrap();
    conn.read_exact(&mut scratch[..payload.len()]).await.unwrap();
}

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let payload = vec![b'x'; 16 * 1024];
    let mut scratch = vec![0u8; 16 * 1024];

    let addr = rt.block_on(start_proxy(false));
    let mut conn = rt.block_on(async { TcpStream::connect(addr).await.unwrap() });
    c.bench_function("16KiB round trip, all slots noop", |b| {
        b.iter(|| rt.block_on(round_trip(&mut conn, &payload, &mut scratch)));
    });

    let addr = rt.block_on(start_proxy(true));
    let mut conn = rt.block_on(async { TcpStream::connect(addr).await.unwrap() });
    c.bench_function("16KiB round trip, zero-valued toxics enabled", |b| {
        b.iter(|| rt.block_on(round_trip(&mut conn, &payload, &mut scratch)));
    });
}

criterion_group!(benches, bench_round_trip);
criterion_main!(benches);
