//! Binary streaming transport.
//!
//! A connection is represented by a [`TransportHandle`] (session side) and a
//! [`TransportPeer`] (network side). The WebSocket connector drives the peer
//! from its own task; tests drive it directly.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures::{SinkExt, StreamExt, future::BoxFuture};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::tungstenite::{
    Message,
    protocol::{CloseFrame, frame::coding::CloseCode},
};
use url::Url;

use crate::session::StreamTarget;

/// Reason sent in the close frame of a locally initiated close.
pub const CLOSE_BY_USER: &str = "close_by_user";

const EVENT_BUFFER: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Message(Bytes),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

pub struct TransportHandle {
    events: mpsc::Receiver<TransportEvent>,
    close_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

/// Network side of a transport.
pub struct TransportPeer {
    pub events: mpsc::Sender<TransportEvent>,
    pub close_rx: oneshot::Receiver<()>,
}

impl TransportHandle {
    pub fn pair() -> (TransportHandle, TransportPeer) {
        let (events_tx, events) = mpsc::channel(EVENT_BUFFER);
        let (close_tx, close_rx) = oneshot::channel();
        (
            TransportHandle {
                events,
                close_tx: Some(close_tx),
                task: None,
            },
            TransportPeer {
                events: events_tx,
                close_rx,
            },
        )
    }

    fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Next event; `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    /// Asks the peer to close and waits for its task. Later calls are no-ops.
    ///
    /// The event channel stays open until the task is done, so a pump blocked
    /// on a full channel still sees the close request.
    pub async fn close(&mut self) {
        let Some(close_tx) = self.close_tx.take() else {
            return;
        };
        let _ = close_tx.send(());
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                log::warn!("transport did not close within {:?}", CLOSE_TIMEOUT);
                task.abort();
            }
        }
        self.events.close();
    }
}

pub trait Connector: Send + Sync {
    fn connect(
        &self,
        target: &StreamTarget,
    ) -> BoxFuture<'static, anyhow::Result<TransportHandle>>;
}

pub type SharedConnector = Arc<dyn Connector>;

/// Opens `gateway_url?camera_id=..&channel=..` over WebSocket.
pub struct WsConnector {
    gateway_url: Url,
}

impl WsConnector {
    pub fn new(gateway_url: &str) -> anyhow::Result<Self> {
        let gateway_url = Url::parse(gateway_url)?;
        match gateway_url.scheme() {
            "ws" | "wss" => {}
            other => anyhow::bail!("unsupported gateway scheme: {}", other),
        }
        Ok(Self { gateway_url })
    }

    pub fn endpoint(&self, target: &StreamTarget) -> Url {
        let mut url = self.gateway_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("camera_id", &target.camera_id)
                .append_pair("channel", &target.channel.to_string());
            if let Some(quality) = target.quality {
                query.append_pair("video_quality", &quality.value().to_string());
            }
        }
        url
    }
}

impl Connector for WsConnector {
    fn connect(
        &self,
        target: &StreamTarget,
    ) -> BoxFuture<'static, anyhow::Result<TransportHandle>> {
        let url = self.endpoint(target);
        Box::pin(async move {
            log::info!("connecting {}", url);
            let (ws, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (handle, peer) = TransportHandle::pair();
            let task = tokio::spawn(pump_websocket(ws, peer));
            Ok(handle.with_task(task))
        })
    }
}

async fn pump_websocket<S>(ws: tokio_tungstenite::WebSocketStream<S>, peer: TransportPeer)
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    let TransportPeer {
        events,
        mut close_rx,
    } = peer;
    let (mut write, mut read) = ws.split();

    // A dropped handle counts as a local close too.
    let closed_locally = loop {
        let msg = tokio::select! {
            biased;
            _ = &mut close_rx => break true,
            msg = read.next() => msg,
        };
        let event = match msg {
            Some(Ok(Message::Binary(data))) => TransportEvent::Message(Bytes::from(data)),
            Some(Ok(Message::Close(frame))) => TransportEvent::Closed {
                code: frame.as_ref().map(|f| u16::from(f.code)),
                reason: frame.map(|f| f.reason.into_owned()).unwrap_or_default(),
            },
            Some(Ok(_)) => continue,
            Some(Err(e)) => TransportEvent::Error(e.to_string()),
            None => TransportEvent::Closed {
                code: None,
                reason: String::new(),
            },
        };
        let last = !matches!(event, TransportEvent::Message(_));
        tokio::select! {
            biased;
            _ = &mut close_rx => break true,
            sent = events.send(event) => {
                if sent.is_err() || last {
                    break false;
                }
            }
        }
    };

    if closed_locally {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: CLOSE_BY_USER.into(),
        };
        if let Err(e) = write.send(Message::Close(Some(frame))).await {
            log::debug!("close frame not sent: {}", e);
        }
    }
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod transport_test;
