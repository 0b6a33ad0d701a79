//! In-memory transport, decoder and sink used by session and pool tests.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

use crate::{
    media::{
        decoder::{DecoderEvent, DecoderEventSender, DecoderFactory, VideoDecoder},
        render::{RenderSink, SinkFactory},
        types::{CodecFamily, CodecProfile, DecodedFrame, EncodedChunk, FrameLedger},
    },
    session::{
        StreamTarget,
        events::{SessionEvent, SessionEventKind, SessionEventReceiver},
        runner::{SessionContext, SessionSettings},
        transport::{Connector, TransportHandle, TransportPeer},
    },
};

/// First byte of a unit the fake decoder rejects on submission.
pub const BAD_UNIT_MARKER: u8 = 0xEE;

pub fn annexb(nals: &[&[u8]]) -> Bytes {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(nal);
    }
    Bytes::from(out)
}

pub fn h264_idr() -> Bytes {
    annexb(&[&[0x67, 0x42, 0x00, 0x1e], &[0x68, 0xce, 0x3c, 0x80], &[0x65, 0x88, 0x84, 0x00]])
}

pub fn h264_slice() -> Bytes {
    annexb(&[&[0x61, 0x9a, 0x02, 0x03]])
}

pub fn h265_idr() -> Bytes {
    annexb(&[&[0x40, 0x01, 0x0c, 0x01], &[0x42, 0x01, 0x01, 0x01], &[0x26, 0x01, 0xaf, 0x06]])
}

/// A unit the decoder accepts at the gate but fails to submit.
pub fn bad_unit() -> Bytes {
    let mut data = vec![BAD_UNIT_MARKER];
    data.extend_from_slice(&h264_slice());
    Bytes::from(data)
}

// ------------------------------------------------------------------------
// transport
// ------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeConnector {
    pub refuse: AtomicBool,
    pub connects: AtomicUsize,
    peers: Mutex<Vec<(StreamTarget, TransportPeer)>>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Removes and returns the newest peer opened for `camera_id`.
    pub fn take_peer(&self, camera_id: &str) -> Option<TransportPeer> {
        let mut peers = self.peers.lock().unwrap();
        let idx = peers.iter().rposition(|(t, _)| t.camera_id == camera_id)?;
        Some(peers.remove(idx).1)
    }

    /// Waits until a connection for `camera_id` has been opened.
    pub async fn wait_peer(&self, camera_id: &str) -> TransportPeer {
        for _ in 0..200 {
            if let Some(peer) = self.take_peer(camera_id) {
                return peer;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no connection opened for {}", camera_id);
    }
}

impl Connector for FakeConnector {
    fn connect(
        &self,
        target: &StreamTarget,
    ) -> BoxFuture<'static, anyhow::Result<TransportHandle>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let result = if self.refuse.load(Ordering::SeqCst) {
            Err(anyhow::anyhow!("connection refused"))
        } else {
            let (handle, peer) = TransportHandle::pair();
            self.peers.lock().unwrap().push((target.clone(), peer));
            Ok(handle)
        };
        Box::pin(async move { result })
    }
}

// ------------------------------------------------------------------------
// decoder
// ------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDecoderFactory {
    pub unavailable: AtomicBool,
    pub unsupported: Mutex<Vec<CodecFamily>>,
    pub created: Mutex<Vec<CodecProfile>>,
    pub closed: Arc<AtomicUsize>,
    pub submitted: Arc<AtomicUsize>,
}

impl FakeDecoderFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> Vec<CodecProfile> {
        self.created.lock().unwrap().clone()
    }
}

impl DecoderFactory for FakeDecoderFactory {
    fn probe(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("no decoder on this platform");
        }
        Ok(())
    }

    fn is_supported(&self, profile: &CodecProfile) -> bool {
        !self.unsupported.lock().unwrap().contains(&profile.family)
    }

    fn create(
        &self,
        profile: &CodecProfile,
        events: DecoderEventSender,
    ) -> anyhow::Result<Box<dyn VideoDecoder>> {
        self.created.lock().unwrap().push(profile.clone());
        Ok(Box::new(FakeDecoder {
            events,
            ledger: FrameLedger::new(),
            closed: false,
            close_count: Arc::clone(&self.closed),
            submitted: Arc::clone(&self.submitted),
        }))
    }
}

/// Emits one 2x2 frame per accepted unit.
pub struct FakeDecoder {
    events: DecoderEventSender,
    ledger: FrameLedger,
    closed: bool,
    close_count: Arc<AtomicUsize>,
    submitted: Arc<AtomicUsize>,
}

impl VideoDecoder for FakeDecoder {
    fn decode(&mut self, chunk: EncodedChunk) -> anyhow::Result<()> {
        if self.closed {
            anyhow::bail!("decoder closed");
        }
        if chunk.data.first() == Some(&BAD_UNIT_MARKER) {
            anyhow::bail!("invalid data");
        }
        self.submitted.fetch_add(1, Ordering::SeqCst);
        let pixels = Bytes::from(vec![0u8; 12]);
        let frame = DecodedFrame::new(&self.ledger, 2, 2, chunk.timestamp, pixels);
        self.events
            .try_send(DecoderEvent::Frame(frame))
            .map_err(|_| anyhow::anyhow!("output full"))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// ------------------------------------------------------------------------
// sink
// ------------------------------------------------------------------------

#[derive(Default)]
pub struct CountingSinkFactory {
    pub drawn: Arc<AtomicUsize>,
    pub revealed: Arc<AtomicUsize>,
}

impl SinkFactory for CountingSinkFactory {
    fn create(&self, _camera_id: &str, _channel: u32) -> Box<dyn RenderSink> {
        Box::new(CountingSink {
            drawn: Arc::clone(&self.drawn),
            revealed: Arc::clone(&self.revealed),
        })
    }
}

struct CountingSink {
    drawn: Arc<AtomicUsize>,
    revealed: Arc<AtomicUsize>,
}

impl RenderSink for CountingSink {
    fn show_placeholder(&mut self) {}

    fn resize(&mut self, _width: u32, _height: u32) -> anyhow::Result<()> {
        Ok(())
    }

    fn draw(&mut self, _frame: &DecodedFrame) -> anyhow::Result<()> {
        self.drawn.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn reveal(&mut self, _fade: Duration) {
        self.revealed.fetch_add(1, Ordering::SeqCst);
    }
}

// ------------------------------------------------------------------------
// harness
// ------------------------------------------------------------------------

pub struct Harness {
    pub connector: Arc<FakeConnector>,
    pub decoders: Arc<FakeDecoderFactory>,
    pub sinks: Arc<CountingSinkFactory>,
    pub events: SessionEventReceiver,
    pub ctx: SessionContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_warmup(Duration::ZERO)
    }

    pub fn with_warmup(warmup: Duration) -> Self {
        let connector = FakeConnector::new();
        let decoders = FakeDecoderFactory::new();
        let sinks = Arc::new(CountingSinkFactory::default());
        let (tx, events) = mpsc::unbounded_channel();
        let ctx = SessionContext {
            connector: connector.clone(),
            decoders: decoders.clone(),
            sinks: sinks.clone(),
            settings: SessionSettings {
                warmup,
                fade_in: Duration::from_millis(300),
                ..Default::default()
            },
            events: tx,
        };
        Self {
            connector,
            decoders,
            sinks,
            events,
            ctx,
        }
    }

    /// Waits for the first event matching `pred`, failing after two seconds.
    pub async fn wait_for(&mut self, pred: impl Fn(&SessionEvent) -> bool) -> SessionEvent {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) if pred(&event) => return event,
                Ok(Some(_)) => continue,
                Ok(None) => panic!("event channel closed"),
                Err(_) => panic!("timed out waiting for event"),
            }
        }
    }

    /// Collects events up to and including the first one matching `pred`.
    pub async fn collect_until(
        &mut self,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> Vec<SessionEvent> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        let mut out = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Ok(Some(event)) => {
                    let done = pred(&event);
                    out.push(event);
                    if done {
                        return out;
                    }
                }
                Ok(None) => panic!("event channel closed"),
                Err(_) => panic!("timed out waiting for event, got {:?}", out),
            }
        }
    }

    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Polls `cond` every few milliseconds, failing after two seconds.
pub async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time");
}

pub fn is_kind(kind: SessionEventKind) -> impl Fn(&SessionEvent) -> bool {
    move |event| event.kind == kind
}
