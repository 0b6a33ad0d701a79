use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Codec family inferred from the bitstream or declared by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecFamily {
    #[serde(alias = "avc")]
    H264,
    #[serde(alias = "hevc")]
    H265,
    Unknown,
}

impl CodecFamily {
    /// Codec ids used by the camera SDK frame header.
    pub fn from_codec_id(id: u32) -> Self {
        match id {
            4 => CodecFamily::H264,
            5 => CodecFamily::H265,
            _ => CodecFamily::Unknown,
        }
    }

    /// Codec identifier handed to the decoder capability.
    pub fn codec_name(&self) -> Option<&'static str> {
        match self {
            CodecFamily::H264 => Some("h264"),
            CodecFamily::H265 => Some("hevc"),
            CodecFamily::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        *self != CodecFamily::Unknown
    }
}

impl Display for CodecFamily {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            CodecFamily::H264 => write!(f, "h264"),
            CodecFamily::H265 => write!(f, "h265"),
            CodecFamily::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for CodecFamily {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h264" | "avc" => Ok(CodecFamily::H264),
            "h265" | "hevc" => Ok(CodecFamily::H265),
            other => match other.parse::<u32>() {
                Ok(id) if CodecFamily::from_codec_id(id).is_known() => {
                    Ok(CodecFamily::from_codec_id(id))
                }
                _ => Err(anyhow::anyhow!("unsupported codec: {}", s)),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Key,
    Delta,
}

/// One transport message interpreted as compressed video.
#[derive(Clone, Debug)]
pub struct AccessUnit {
    pub data: Bytes,
    pub kind: FrameKind,
    pub codec: CodecFamily,
}

impl AccessUnit {
    pub fn is_key(&self) -> bool {
        self.kind == FrameKind::Key
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HardwareAcceleration {
    PreferHardware,
    PreferSoftware,
    #[default]
    NoPreference,
}

/// Resolved decoder configuration for a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CodecProfile {
    pub family: CodecFamily,
    pub hardware_acceleration: HardwareAcceleration,
}

impl CodecProfile {
    pub fn new(family: CodecFamily, hardware_acceleration: HardwareAcceleration) -> Self {
        Self {
            family,
            hardware_acceleration,
        }
    }

    /// Decoder codec identifier. Unknown streams are opened as H.264, the camera default.
    pub fn codec(&self) -> &'static str {
        self.family.codec_name().unwrap_or("h264")
    }
}

/// Access unit accepted by the gate, ready for decoder submission.
#[derive(Clone, Debug)]
pub struct EncodedChunk {
    pub kind: FrameKind,
    pub timestamp: i64,
    pub data: Bytes,
}

impl EncodedChunk {
    pub fn is_key(&self) -> bool {
        self.kind == FrameKind::Key
    }
}

/// Counts frames handed out by a decoder that have not been released yet.
#[derive(Clone, Debug, Default)]
pub struct FrameLedger {
    outstanding: Arc<AtomicUsize>,
}

impl FrameLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn acquire(&self) -> FrameLease {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        FrameLease {
            outstanding: Arc::clone(&self.outstanding),
        }
    }
}

/// Released when the owning frame is dropped.
#[derive(Debug)]
struct FrameLease {
    outstanding: Arc<AtomicUsize>,
}

impl Drop for FrameLease {
    fn drop(&mut self) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Decoded frame in packed RGB24. Dropping it releases the decoder's frame slot.
#[derive(Debug)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    pub timestamp: i64,
    pub data: Bytes,
    _lease: FrameLease,
}

impl DecodedFrame {
    pub fn new(ledger: &FrameLedger, width: u32, height: u32, timestamp: i64, data: Bytes) -> Self {
        Self {
            width,
            height,
            timestamp,
            data,
            _lease: ledger.acquire(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Display for DecodedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "DecodedFrame {{ {}x{}, ts: {}, data: {} }}",
            self.width,
            self.height,
            self.timestamp,
            self.data.len()
        )
    }
}

/// Camera stream quality requested from the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Low,
    High,
}

impl VideoQuality {
    pub fn value(&self) -> u8 {
        match self {
            VideoQuality::Low => 1,
            VideoQuality::High => 3,
        }
    }
}
