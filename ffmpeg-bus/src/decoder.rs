use std::{
    sync::mpsc::{self, RecvTimeoutError},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    frame::VideoFrame,
    hw::{self, HwPreference},
    packet::RawPacket,
    scaler::Scaler,
};

pub type DecodeOutputSender = tokio::sync::mpsc::Sender<DecodeOutput>;
pub type DecodeOutputReceiver = tokio::sync::mpsc::Receiver<DecodeOutput>;

enum DecodeCmd {
    Data(RawPacket),
    Close,
}

/// What the decoder thread reports back.
///
/// `Error` is scoped to the packet that caused it; the decoder keeps running.
/// `Fatal` means the codec context is unusable and the task has stopped.
pub enum DecodeOutput {
    Frame(VideoFrame),
    Error(String),
    Fatal(String),
}

/// The codec calls the decoder thread makes, so the loop can run without a device.
pub(crate) trait PacketDecoder: Send + 'static {
    fn name(&self) -> &str;
    fn send_packet(&mut self, packet: &RawPacket) -> Result<(), ffmpeg_next::Error>;
    fn receive_frame(&mut self) -> Result<Option<ffmpeg_next::frame::Video>, ffmpeg_next::Error>;
}

/// Errors after which the codec context takes no more input. Anything else,
/// including `InvalidData` from either call, belongs to one packet.
fn is_fatal(err: &ffmpeg_next::Error) -> bool {
    matches!(
        err,
        ffmpeg_next::Error::Eof | ffmpeg_next::Error::Bug | ffmpeg_next::Error::Bug2
    )
}

pub struct Decoder {
    inner: ffmpeg_next::codec::decoder::Video,
    name: String,
}

impl Decoder {
    /// True if FFmpeg has any decoder (hardware or software) for `codec`.
    pub fn supports(codec: &str) -> bool {
        hw::codec_id_from_name(codec)
            .and_then(ffmpeg_next::decoder::find)
            .is_some()
    }

    /// Opens the first candidate from [`hw::decoder_candidates`] that works.
    ///
    /// A hardware decoder can be registered on a host without the device, so
    /// each one is actually opened before it is chosen.
    pub fn open(codec: &str, preference: HwPreference) -> anyhow::Result<Self> {
        let codec_id = hw::codec_id_from_name(codec)
            .ok_or_else(|| anyhow::anyhow!("unsupported codec: {}", codec))?;

        let mut last_err = None;
        for candidate in hw::decoder_candidates(codec_id, preference) {
            let name = candidate.name().to_string();
            let decoder_ctx = ffmpeg_next::codec::Context::new();
            match decoder_ctx
                .decoder()
                .open_as(candidate)
                .and_then(|opened| opened.video())
            {
                Ok(inner) => {
                    log::info!("decoder opened: {} ({:?})", name, preference);
                    return Ok(Self { inner, name });
                }
                Err(e) => {
                    log::warn!("decoder {} failed to open: {}", name, e);
                    last_err = Some(e);
                }
            }
        }
        match last_err {
            Some(e) => Err(anyhow::anyhow!("no decoder for {:?} could be opened: {}", codec_id, e)),
            None => anyhow::bail!("decoder not found for {:?}", codec_id),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PacketDecoder for Decoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_packet(&mut self, packet: &RawPacket) -> Result<(), ffmpeg_next::Error> {
        self.inner.send_packet(packet.packet())
    }

    fn receive_frame(&mut self) -> Result<Option<ffmpeg_next::frame::Video>, ffmpeg_next::Error> {
        let mut frame = ffmpeg_next::frame::Video::empty();
        match self.inner.receive_frame(&mut frame) {
            Ok(()) => Ok(Some(frame)),
            Err(ffmpeg_next::Error::Eof) => Ok(None),
            Err(ffmpeg_next::Error::Other { errno })
                if errno == ffmpeg_next::util::error::EAGAIN =>
            {
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

/// Runs a [`Decoder`] on a blocking thread.
///
/// Packets are submitted in order through [`DecoderTask::send`]; frames and errors come
/// back on the output channel given to [`DecoderTask::start`].
pub struct DecoderTask {
    cancel: CancellationToken,
    packet_tx: mpsc::Sender<DecodeCmd>,
}

impl DecoderTask {
    pub fn start(decoder: Decoder, out_sender: DecodeOutputSender) -> Self {
        Self::spawn(decoder, out_sender)
    }

    pub(crate) fn spawn<D: PacketDecoder>(decoder: D, out_sender: DecodeOutputSender) -> Self {
        let cancel = CancellationToken::new();
        let (packet_tx, packet_rx) = mpsc::channel::<DecodeCmd>();

        let handle_cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            Self::decoder_loop(decoder, handle_cancel, packet_rx, out_sender)
        });

        Self { cancel, packet_tx }
    }

    /// Queues a packet. Fails only when the decoder thread has already stopped.
    pub fn send(&self, packet: RawPacket) -> anyhow::Result<()> {
        if self.cancel.is_cancelled() {
            anyhow::bail!("decoder task stopped");
        }
        self.packet_tx
            .send(DecodeCmd::Data(packet))
            .map_err(|_| anyhow::anyhow!("decoder task stopped"))
    }

    pub fn stop(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        let _ = self.packet_tx.send(DecodeCmd::Close);
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn decoder_loop<D: PacketDecoder>(
        mut decoder: D,
        cancel: CancellationToken,
        packet_rx: mpsc::Receiver<DecodeCmd>,
        out_sender: DecodeOutputSender,
    ) {
        let mut scaler = Scaler::new();
        'packets: loop {
            if cancel.is_cancelled() {
                break;
            }
            let packet = match packet_rx.recv_timeout(Duration::from_millis(10)) {
                Ok(DecodeCmd::Data(packet)) => packet,
                Ok(DecodeCmd::Close) => break,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            if let Err(e) = decoder.send_packet(&packet) {
                log::warn!(
                    "{}: send packet error (pts {:?}, {} bytes): {}",
                    decoder.name(),
                    packet.pts(),
                    packet.size(),
                    e
                );
                if !Self::report(&decoder, &out_sender, &cancel, e) {
                    break;
                }
                continue;
            }

            loop {
                let output = match decoder.receive_frame() {
                    Ok(Some(frame)) => match VideoFrame::from_decoded(&frame, &mut scaler) {
                        Ok(frame) => DecodeOutput::Frame(frame),
                        Err(e) => DecodeOutput::Error(format!("{:#}", e)),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!(
                            "{}: receive frame error (pts {:?}): {}",
                            decoder.name(),
                            packet.pts(),
                            e
                        );
                        if !Self::report(&decoder, &out_sender, &cancel, e) {
                            break 'packets;
                        }
                        break;
                    }
                };
                if out_sender.blocking_send(output).is_err() {
                    break 'packets;
                }
            }
        }
        cancel.cancel();
        log::debug!("{}: decoder loop finished", decoder.name());
    }

    /// Sends a codec error on. Returns false when the loop has to stop.
    fn report<D: PacketDecoder>(
        decoder: &D,
        out_sender: &DecodeOutputSender,
        cancel: &CancellationToken,
        err: ffmpeg_next::Error,
    ) -> bool {
        if is_fatal(&err) {
            log::error!("{}: decoder cannot continue: {}", decoder.name(), err);
            let _ = out_sender.blocking_send(DecodeOutput::Fatal(err.to_string()));
            cancel.cancel();
            return false;
        }
        out_sender
            .blocking_send(DecodeOutput::Error(err.to_string()))
            .is_ok()
    }
}

impl Drop for DecoderTask {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "decoder_test.rs"]
mod decoder_test;
