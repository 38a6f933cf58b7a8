use hudmon::types::ServerMessage;
use hudmon::ws::{connect, next_message};

// Integration probe: only runs when HUDMON_WS is set to an agent WebSocket URL.
// Example: HUDMON_WS=ws://127.0.0.1:5000/ws cargo test -p hudmon --test ws_probe -- --nocapture
#[tokio::test]
async fn probe_ws_stream() {
    // Gate the test to avoid CI failures when no agent is running.
    let url = match std::env::var("HUDMON_WS") {
        Ok(v) if !v.is_empty() => v,
        _ => {
            eprintln!("skipping ws_probe: set HUDMON_WS=ws://host:port/ws to run this integration test");
            return;
        }
    };

    let mut ws = connect(&url).await.expect("connect ws");

    // The backlog always comes first, even when empty
    let first = next_message(&mut ws).await.expect("read").expect("open");
    assert!(matches!(first, ServerMessage::History { .. }), "expected history, got {first:?}");

    // Then a live update (or an error notice) within a few ticks
    let next = tokio::time::timeout(std::time::Duration::from_secs(10), next_message(&mut ws))
        .await
        .expect("frame within timeout")
        .expect("read")
        .expect("open");
    assert!(matches!(next, ServerMessage::Update(_) | ServerMessage::Error { .. }));
}
