mod common;

use std::time::Duration;

use common::*;
use nettox::toxics::Bandwidth;
use nettox::{Toxic, ToxicKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

#[tokio::test]
async fn upstream_bandwidth_meters_delivery() {
    let mut fixture = start_echo_proxy("bandwidth-test").await;
    // 128 kbit/s = 16 KiB/s, so 8 KiB should take roughly 500ms upstream.
    fixture
        .proxy
        .up_toxics()
        .set(Toxic {
            enabled: true,
            kind: ToxicKind::Bandwidth(Bandwidth { rate: 128 }),
        })
        .await
        .unwrap();

    let mut conn = connect(fixture.addr).await;
    let payload = test_payload(8 * 1024);

    let start = Instant::now();
    conn.write_all(&payload).await.unwrap();

    let received = fixture.server_lines.recv().await.unwrap();
    let elapsed = start.elapsed();
    assert_eq!(received, payload, "server read wrong bytes");
    assert!(
        elapsed >= Duration::from_millis(350),
        "8 KiB at 16 KiB/s arrived in {elapsed:?}, cap not enforced"
    );
    assert!(
        elapsed <= Duration::from_millis(1500),
        "8 KiB at 16 KiB/s took {elapsed:?}, far slower than the cap"
    );

    // The reply direction is unmetered.
    let reply_start = Instant::now();
    let mut echoed = vec![0u8; payload.len()];
    conn.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload);
    assert!(
        reply_start.elapsed() < Duration::from_millis(200),
        "unmetered downstream took {:?}",
        reply_start.elapsed()
    );
}

#[tokio::test]
async fn bandwidth_splits_preserve_order() {
    let mut fixture = start_echo_proxy("bandwidth-order-test").await;
    // Tight enough that every write gets split into several slices.
    fixture
        .proxy
        .up_toxics()
        .set(Toxic {
            enabled: true,
            kind: ToxicKind::Bandwidth(Bandwidth { rate: 256 }),
        })
        .await
        .unwrap();

    let mut conn = connect(fixture.addr).await;
    let mut payload: Vec<u8> = (0u32..4096).map(|i| (i % 251) as u8).collect();
    payload.push(b'\n');
    conn.write_all(&payload).await.unwrap();

    let received = fixture.server_lines.recv().await.unwrap();
    assert_eq!(received, payload, "split chunks arrived corrupted or reordered");
}

#[tokio::test]
async fn zero_rate_behaves_like_noop() {
    let mut fixture = start_echo_proxy("bandwidth-zero-test").await;
    fixture
        .proxy
        .up_toxics()
        .set(Toxic {
            enabled: true,
            kind: ToxicKind::Bandwidth(Bandwidth { rate: 0 }),
        })
        .await
        .unwrap();

    let mut conn = connect(fixture.addr).await;
    let start = Instant::now();
    echo_exchange(&mut conn, &test_payload(32 * 1024)).await;
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "zero rate throttled traffic: {:?}",
        start.elapsed()
    );
}
