use chrono::Utc;
use coldstored::core::state::{
    ApiLogBuffer, ApiLogEntry, PROGRESS_CHANNEL_CAPACITY, ProgressEvent, ProgressHub,
};

fn entry(path: &str) -> ApiLogEntry {
    ApiLogEntry {
        at: Utc::now(),
        method: "GET".to_string(),
        path: path.to_string(),
        status: 200,
        user_id: None,
    }
}

#[test]
fn test_api_log_buffer_caps_at_1000() {
    let buffer = ApiLogBuffer::default();
    for i in 0..1100 {
        buffer.push(entry(&format!("/req/{i}")));
    }
    assert_eq!(buffer.len(), 1000);
    let snapshot = buffer.snapshot();
    // Oldest entries were dropped.
    assert_eq!(snapshot.first().unwrap().path, "/req/100");
    assert_eq!(snapshot.last().unwrap().path, "/req/1099");
}

#[test]
fn test_progress_producer_never_blocks() {
    let hub = ProgressHub::default();
    let publisher = hub.publisher("node:1");
    let mut receiver = hub.subscribe("node:1");

    // Flood well past the channel capacity with no consumer keeping up.
    for i in 0..(PROGRESS_CHANNEL_CAPACITY * 4) {
        let _ = publisher.send(ProgressEvent::new("step", "running", format!("event {i}")));
    }

    // The lagging consumer loses the oldest events but the newest survive.
    let mut seen = 0;
    loop {
        match receiver.try_recv() {
            Ok(_) => seen += 1,
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    assert!(seen > 0);
    assert!(seen <= PROGRESS_CHANNEL_CAPACITY);
}

#[test]
fn test_progress_topics_are_isolated() {
    let hub = ProgressHub::default();
    let mut deploy_rx = hub.subscribe("deploy:7");
    let node_tx = hub.publisher("node:7");
    let _ = node_tx.send(ProgressEvent::new("step", "running", ""));
    assert!(deploy_rx.try_recv().is_err());
}

#[test]
fn test_progress_close_drops_channel() {
    let hub = ProgressHub::default();
    let mut receiver = hub.subscribe("deploy:9");
    hub.close("deploy:9");
    // With the hub's sender gone the stream terminates.
    assert!(matches!(
        receiver.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Closed)
    ));
}
