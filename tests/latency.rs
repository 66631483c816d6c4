mod common;

use std::time::Duration;

use common::*;
use nettox::toxics::Latency;
use nettox::{Toxic, ToxicKind};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

/// Scheduler/loopback slack on top of the configured jitter.
const SLACK: Duration = Duration::from_millis(50);

async fn do_latency_test(up: Option<Latency>, down: Option<Latency>) {
    let mut fixture = start_echo_proxy("latency-test").await;

    if let Some(up) = up {
        fixture
            .proxy
            .up_toxics()
            .set(Toxic {
                enabled: true,
                kind: ToxicKind::Latency(up),
            })
            .await
            .unwrap();
    }
    if let Some(down) = down {
        fixture
            .proxy
            .down_toxics()
            .set(Toxic {
                enabled: true,
                kind: ToxicKind::Latency(down),
            })
            .await
            .unwrap();
    }
    let up = up.unwrap_or_default();
    let down = down.unwrap_or_default();

    let mut conn = connect(fixture.addr).await;
    let payload = test_payload(32 * 1024);

    let start = Instant::now();
    conn.write_all(&payload).await.unwrap();

    let received = fixture.server_lines.recv().await.unwrap();
    assert_eq!(received, payload, "server read wrong bytes");
    assert_delta_time(
        "server read",
        start.elapsed(),
        Duration::from_millis(up.latency),
        Duration::from_millis(up.jitter) + SLACK,
    );

    let reply_start = Instant::now();
    let mut echoed = vec![0u8; payload.len()];
    conn.read_exact(&mut echoed).await.unwrap();
    assert_eq!(echoed, payload, "client read wrong bytes");
    assert_delta_time(
        "client read",
        reply_start.elapsed(),
        Duration::from_millis(down.latency),
        Duration::from_millis(down.jitter) + SLACK,
    );
    assert_delta_time(
        "round trip",
        start.elapsed(),
        Duration::from_millis(up.latency + down.latency),
        Duration::from_millis(up.jitter + down.jitter) + SLACK,
    );
}

#[tokio::test]
async fn upstream_latency_delays_server_read() {
    do_latency_test(
        Some(Latency {
            latency: 100,
            jitter: 0,
        }),
        None,
    )
    .await;
}

#[tokio::test]
async fn downstream_latency_delays_client_read() {
    do_latency_test(
        None,
        Some(Latency {
            latency: 100,
            jitter: 0,
        }),
    )
    .await;
}

#[tokio::test]
async fn bidirectional_latency_doubles_round_trip() {
    do_latency_test(
        Some(Latency {
            latency: 100,
            jitter: 0,
        }),
        Some(Latency {
            latency: 100,
            jitter: 0,
        }),
    )
    .await;
}

#[tokio::test]
async fn latency_with_jitter_stays_in_band() {
    do_latency_test(
        Some(Latency {
            latency: 100,
            jitter: 20,
        }),
        None,
    )
    .await;
}

#[tokio::test]
async fn zero_latency_behaves_like_noop() {
    // Enabled but zero-valued parameters reduce to passthrough.
    do_latency_test(
        Some(Latency {
            latency: 0,
            jitter: 0,
        }),
        None,
    )
    .await;
}
