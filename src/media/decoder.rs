//! Decoder capability seam.
//!
//! Sessions only see [`DecoderFactory`] and [`VideoDecoder`]; the FFmpeg
//! implementation lives behind them so the session loop can run against an
//! in-memory decoder in tests.

use std::sync::Arc;

use ffmpeg_bus::{
    decoder::{DecodeOutput, DecodeOutputReceiver, Decoder, DecoderTask},
    hw::HwPreference,
    packet::RawPacket,
};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::media::types::{
    CodecProfile, DecodedFrame, EncodedChunk, FrameLedger, HardwareAcceleration,
};

/// Output of a running decoder.
#[derive(Debug)]
pub enum DecoderEvent {
    Frame(DecodedFrame),
    /// Scoped to one access unit; the decoder is still usable.
    Error(String),
    /// The decoder stopped and will not produce further frames.
    Fatal(String),
}

pub type DecoderEventSender = mpsc::Sender<DecoderEvent>;
pub type DecoderEventReceiver = mpsc::Receiver<DecoderEvent>;

/// A configured decoder instance owned by one session.
pub trait VideoDecoder: Send {
    /// Submits one access unit. An error here is per-unit, not fatal.
    fn decode(&mut self, chunk: EncodedChunk) -> anyhow::Result<()>;

    /// Releases the decoder. Calling it more than once is a no-op.
    fn close(&mut self);
}

pub trait DecoderFactory: Send + Sync {
    /// Fails when the platform has no decoding capability at all.
    fn probe(&self) -> anyhow::Result<()>;

    fn is_supported(&self, profile: &CodecProfile) -> bool;

    fn create(
        &self,
        profile: &CodecProfile,
        events: DecoderEventSender,
    ) -> anyhow::Result<Box<dyn VideoDecoder>>;
}

pub type SharedDecoderFactory = Arc<dyn DecoderFactory>;

impl From<HardwareAcceleration> for HwPreference {
    fn from(value: HardwareAcceleration) -> Self {
        match value {
            HardwareAcceleration::PreferHardware => HwPreference::PreferHardware,
            HardwareAcceleration::PreferSoftware => HwPreference::PreferSoftware,
            HardwareAcceleration::NoPreference => HwPreference::NoPreference,
        }
    }
}

#[derive(Debug, Default)]
pub struct FfmpegDecoderFactory;

impl FfmpegDecoderFactory {
    pub fn new() -> Self {
        Self
    }
}

impl DecoderFactory for FfmpegDecoderFactory {
    fn probe(&self) -> anyhow::Result<()> {
        ffmpeg_bus::init()
    }

    fn is_supported(&self, profile: &CodecProfile) -> bool {
        Decoder::supports(profile.codec())
    }

    fn create(
        &self,
        profile: &CodecProfile,
        events: DecoderEventSender,
    ) -> anyhow::Result<Box<dyn VideoDecoder>> {
        let decoder = Decoder::open(profile.codec(), profile.hardware_acceleration.into())?;
        log::info!("{} decoder ready for {}", decoder.name(), profile.family);

        let (out_tx, out_rx) = mpsc::channel(8);
        let task = DecoderTask::start(decoder, out_tx);
        let ledger = FrameLedger::new();
        let forward = tokio::spawn(forward_decode_output(out_rx, events, ledger.clone()));

        Ok(Box::new(FfmpegDecoder {
            task: Some(task),
            forward: Some(forward),
            ledger,
        }))
    }
}

pub struct FfmpegDecoder {
    task: Option<DecoderTask>,
    forward: Option<JoinHandle<()>>,
    ledger: FrameLedger,
}

impl VideoDecoder for FfmpegDecoder {
    fn decode(&mut self, chunk: EncodedChunk) -> anyhow::Result<()> {
        let task = self
            .task
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("decoder closed"))?;
        task.send(RawPacket::new(&chunk.data, chunk.timestamp, chunk.is_key()))
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.stop();
            log::debug!("decoder closed, {} frames still leased", self.ledger.outstanding());
        }
        if let Some(forward) = self.forward.take() {
            forward.abort();
        }
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        self.close();
    }
}

/// Moves decoder thread output onto the session's event channel, wrapping each
/// frame in a ledger lease.
async fn forward_decode_output(
    mut output: DecodeOutputReceiver,
    events: DecoderEventSender,
    ledger: FrameLedger,
) {
    while let Some(out) = output.recv().await {
        let event = match out {
            DecodeOutput::Frame(frame) => DecoderEvent::Frame(DecodedFrame::new(
                &ledger,
                frame.width,
                frame.height,
                frame.pts,
                frame.data,
            )),
            DecodeOutput::Error(e) => DecoderEvent::Error(e),
            DecodeOutput::Fatal(e) => DecoderEvent::Fatal(e),
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
}
