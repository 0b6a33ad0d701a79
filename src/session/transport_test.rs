// ============================================================================
// Transport Tests
// ============================================================================

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use super::*;
use crate::media::types::VideoQuality;

#[test]
fn test_endpoint_query() {
    let connector = WsConnector::new("ws://127.0.0.1:8000/api/miot/ws/video_stream").unwrap();
    let url = connector.endpoint(&StreamTarget::new("1032", 0));
    assert_eq!(
        url.as_str(),
        "ws://127.0.0.1:8000/api/miot/ws/video_stream?camera_id=1032&channel=0"
    );

    let url = connector.endpoint(&StreamTarget::new("cam 7", 1).with_quality(VideoQuality::High));
    assert_eq!(url.query(), Some("camera_id=cam+7&channel=1&video_quality=3"));
}

#[test]
fn test_rejects_non_websocket_gateway() {
    assert!(WsConnector::new("http://127.0.0.1:8000/stream").is_err());
    assert!(WsConnector::new("not a url").is_err());
}

#[tokio::test]
async fn test_handle_close_is_idempotent() {
    let (mut handle, mut peer) = TransportHandle::pair();

    handle.close().await;
    handle.close().await;
    assert!((&mut peer.close_rx).await.is_ok());
    assert!(peer.events.send(TransportEvent::Message(Bytes::new())).await.is_err());
}

#[tokio::test]
async fn test_dropping_handle_signals_peer() {
    let (handle, peer) = TransportHandle::pair();
    drop(handle);
    assert!(peer.close_rx.await.is_err());
}

#[tokio::test]
async fn test_websocket_roundtrip_and_user_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Binary(vec![0, 0, 0, 1, 0x65, 0x88]))
            .await
            .unwrap();
        ws.send(Message::Text("ignored".to_string())).await.unwrap();
        ws.send(Message::Binary(vec![0, 0, 0, 1, 0x61, 0x9a]))
            .await
            .unwrap();
        // Wait for the client's close frame.
        while let Some(msg) = ws.next().await {
            if let Ok(Message::Close(frame)) = msg {
                return frame.map(|f| (u16::from(f.code), f.reason.into_owned()));
            }
        }
        None
    });

    let connector = WsConnector::new(&format!("ws://{}/stream", addr)).unwrap();
    let mut handle = connector
        .connect(&StreamTarget::new("cam", 0))
        .await
        .unwrap();

    assert_eq!(
        handle.recv().await,
        Some(TransportEvent::Message(Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88])))
    );
    assert_eq!(
        handle.recv().await,
        Some(TransportEvent::Message(Bytes::from_static(&[0, 0, 0, 1, 0x61, 0x9a])))
    );

    handle.close().await;
    let close = server.await.unwrap();
    assert_eq!(close, Some((1000, CLOSE_BY_USER.to_string())));
}

/// Serves one client with binary frames as fast as it can, and returns the
/// close frame the client sends.
async fn flood_server(listener: TcpListener) -> Option<(u16, String)> {
    let (stream, _) = listener.accept().await.unwrap();
    let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
    let (mut tx, mut rx) = ws.split();
    let flood = tokio::spawn(async move {
        let mut seq = 0u32;
        loop {
            seq = seq.wrapping_add(1);
            let mut frame = vec![0, 0, 0, 1, 0x61];
            frame.extend_from_slice(&seq.to_be_bytes());
            if tx.send(Message::Binary(frame)).await.is_err() {
                break;
            }
        }
    });
    let mut close = None;
    while let Some(msg) = rx.next().await {
        if let Ok(Message::Close(frame)) = msg {
            close = frame.map(|f| (u16::from(f.code), f.reason.into_owned()));
            break;
        }
    }
    flood.abort();
    close
}

#[tokio::test]
async fn test_user_close_frame_sent_while_streaming() {
    for _ in 0..10 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(flood_server(listener));

        let connector = WsConnector::new(&format!("ws://{}/stream", addr)).unwrap();
        let mut handle = connector
            .connect(&StreamTarget::new("cam", 0))
            .await
            .unwrap();
        for _ in 0..5 {
            assert!(matches!(handle.recv().await, Some(TransportEvent::Message(_))));
        }

        handle.close().await;
        let close = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(close, Some((1000, CLOSE_BY_USER.to_string())));
    }
}

#[tokio::test]
async fn test_remote_close_is_reported() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(Some(CloseFrame {
            code: CloseCode::Away,
            reason: "camera offline".into(),
        }))
        .await
        .unwrap();
    });

    let connector = WsConnector::new(&format!("ws://{}/stream", addr)).unwrap();
    let mut handle = connector
        .connect(&StreamTarget::new("cam", 0))
        .await
        .unwrap();

    assert_eq!(
        handle.recv().await,
        Some(TransportEvent::Closed {
            code: Some(1001),
            reason: "camera offline".to_string(),
        })
    );
}

#[tokio::test]
async fn test_connect_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = WsConnector::new(&format!("ws://{}/stream", addr)).unwrap();
    assert!(connector.connect(&StreamTarget::new("cam", 0)).await.is_err());
}
