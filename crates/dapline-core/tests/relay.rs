//! End-to-end relay scenarios against a scripted DAP backend

use dapline_core::codec::{encode, FrameDecoder};
use dapline_core::config::RelayConfig;
use dapline_core::invoke::{invoke, operations, FixedResolver};
use dapline_core::protocol::{commands, DapMessage, DapResponse};
use dapline_core::{Endpoint, RelayContext};
use serde_json::json;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// A backend that answers every request with a successful response and
/// emits a `stopped` event after the first one.
async fn scripted_backend(listener: TcpListener) {
    loop {
        let Ok((mut stream, _)) = listener.accept().await else {
            return;
        };
        tokio::spawn(async move {
            let mut decoder = FrameDecoder::new();
            let mut buf = [0u8; 2048];
            let mut reply_seq = 1;
            loop {
                let Ok(n) = stream.read(&mut buf).await else {
                    return;
                };
                if n == 0 {
                    return;
                }
                for frame in decoder.feed(&buf[..n]) {
                    let Ok(DapMessage::Request(req)) = frame else {
                        continue;
                    };
                    if req.command == commands::CONTINUE {
                        let event = DapMessage::Event(dapline_core::DapEvent {
                            seq: reply_seq,
                            event: "stopped".to_string(),
                            body: Some(json!({"reason": "breakpoint", "threadId": 1})),
                        });
                        reply_seq += 1;
                        let _ = write_frame(&mut stream, &event).await;
                    }
                    let response = DapMessage::Response(DapResponse {
                        seq: reply_seq,
                        request_seq: req.seq,
                        success: true,
                        command: req.command.clone(),
                        message: None,
                        body: Some(json!({"supportsConfigurationDoneRequest": true})),
                    });
                    reply_seq += 1;
                    if write_frame(&mut stream, &response).await.is_err() {
                        return;
                    }
                }
            }
        });
    }
}

async fn write_frame(stream: &mut TcpStream, message: &DapMessage) -> std::io::Result<()> {
    let frame = encode(message).unwrap();
    stream.write_all(frame.as_bytes()).await
}

async fn start_backend() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(scripted_backend(listener));
    port
}

#[tokio::test]
async fn test_initialize_round_trip_reports_success() {
    let port = start_backend().await;
    let ctx = RelayContext::new(RelayConfig::default());
    let resolver = FixedResolver::new(Endpoint::new("127.0.0.1", port));

    let result = invoke(
        &ctx,
        &resolver,
        operations::SEND_REQUEST,
        json!({
            "command": commands::INITIALIZE,
            "arguments": {"adapterID": "go"},
        }),
    )
    .await
    .unwrap();

    assert_eq!(result["success"], true);
    assert_eq!(result["request_seq"], 1);
    assert_eq!(result["command"], "initialize");
    assert_eq!(result["body"]["supportsConfigurationDoneRequest"], true);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_events_collected_while_requests_flow() {
    let port = start_backend().await;
    let ctx = Arc::new(RelayContext::new(RelayConfig::default()));
    let resolver = FixedResolver::new(Endpoint::new("127.0.0.1", port));

    // Start the bounded collection, then trigger a request that makes the
    // backend emit a stopped event before its response.
    let collector = {
        let ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            ctx.dispatcher()
                .listen_for_events(
                    &["stopped".to_string()],
                    std::time::Duration::from_secs(5),
                    1,
                )
                .await
        })
    };
    // Let the collector register its listener first
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let result = invoke(
        &ctx,
        &resolver,
        operations::SEND_REQUEST,
        json!({"command": commands::CONTINUE, "arguments": {"threadId": 1}}),
    )
    .await
    .unwrap();
    assert_eq!(result["success"], true);

    let events = collector.await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event, "stopped");

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_listen_events_via_invoke_times_out_cleanly() {
    let port = start_backend().await;
    let ctx = RelayContext::new(RelayConfig::default());
    let resolver = FixedResolver::new(Endpoint::new("127.0.0.1", port));

    let result = invoke(
        &ctx,
        &resolver,
        operations::LISTEN_EVENTS,
        json!({
            "event_types": ["terminated"],
            "timeout_ms": 100,
            "max_events": 5,
        }),
    )
    .await
    .unwrap();

    assert_eq!(result["count"], 0);
    assert_eq!(result["events"].as_array().unwrap().len(), 0);

    ctx.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_and_close_all_via_invoke() {
    let port = start_backend().await;
    let ctx = RelayContext::new(RelayConfig::default());
    let resolver = FixedResolver::new(Endpoint::new("127.0.0.1", port));

    invoke(
        &ctx,
        &resolver,
        operations::SEND_REQUEST,
        json!({"command": commands::INITIALIZE}),
    )
    .await
    .unwrap();
    assert_eq!(ctx.registry().connection_count(), 1);

    let result = invoke(&ctx, &resolver, operations::DISCONNECT, json!({}))
        .await
        .unwrap();
    assert_eq!(result["disconnected"], true);
    assert_eq!(ctx.registry().connection_count(), 0);

    // Disconnecting again reports false, not an error
    let result = invoke(&ctx, &resolver, operations::DISCONNECT, json!({}))
        .await
        .unwrap();
    assert_eq!(result["disconnected"], false);

    ctx.shutdown().await;
}
