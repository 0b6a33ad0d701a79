//! Per-camera streaming session.
//!
//! ```text
//! Idle ─► Connecting ─► WaitingFirstFrame ─► Streaming
//!   │          │                │                 │
//!   └──────────┴────────────────┴─────────────────┴──► Closed(reason)
//! ```

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::media::types::{CodecFamily, VideoQuality};

pub mod events;
pub mod runner;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

/// What a session streams: one channel of one camera.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamTarget {
    pub camera_id: String,
    #[serde(default)]
    pub channel: u32,
    /// Declared codec; detected from the stream when absent.
    #[serde(default)]
    pub codec: Option<CodecFamily>,
    #[serde(default)]
    pub quality: Option<VideoQuality>,
}

impl StreamTarget {
    pub fn new(camera_id: impl Into<String>, channel: u32) -> Self {
        Self {
            camera_id: camera_id.into(),
            channel,
            codec: None,
            quality: None,
        }
    }

    pub fn with_codec(mut self, codec: CodecFamily) -> Self {
        self.codec = Some(codec);
        self
    }

    pub fn with_quality(mut self, quality: VideoQuality) -> Self {
        self.quality = Some(quality);
        self
    }
}

impl Display for StreamTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{}/{}", self.camera_id, self.channel)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    UserClosed,
    RemoteClosed,
    TransportError,
    DecodeFatal,
    Superseded,
}

impl CloseReason {
    /// Whether the caller is told to stop playback for this tile.
    pub fn stops_playback(&self) -> bool {
        matches!(self, CloseReason::RemoteClosed | CloseReason::TransportError)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "name", content = "reason", rename_all = "kebab-case")]
pub enum SessionState {
    Idle,
    Connecting,
    WaitingFirstFrame,
    Streaming,
    Closed(CloseReason),
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed(_))
    }

    fn can_move_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed(_), _) => false,
            (_, Closed(_)) => true,
            (Idle, Connecting) => true,
            (Connecting, WaitingFirstFrame) => true,
            (WaitingFirstFrame, Streaming) => true,
            _ => false,
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::WaitingFirstFrame => write!(f, "waiting-first-frame"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Closed(reason) => write!(f, "closed({:?})", reason),
        }
    }
}

/// State machine for one session generation.
#[derive(Debug)]
pub struct StreamSession {
    target: StreamTarget,
    epoch: u64,
    state: SessionState,
}

impl StreamSession {
    pub fn new(target: StreamTarget, epoch: u64) -> Self {
        Self {
            target,
            epoch,
            state: SessionState::Idle,
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Moves to `next`. Closed is terminal; anything not on the diagram is rejected.
    pub fn transition(&mut self, next: SessionState) -> anyhow::Result<()> {
        if !self.state.can_move_to(&next) {
            log::error!(
                "{} epoch {}: illegal transition {} -> {}",
                self.target,
                self.epoch,
                self.state,
                next
            );
            anyhow::bail!("illegal transition {} -> {}", self.state, next);
        }
        log::debug!("{} epoch {}: {} -> {}", self.target, self.epoch, self.state, next);
        self.state = next;
        Ok(())
    }

    /// Closes the session. Returns `false` when it was already closed.
    pub fn close(&mut self, reason: CloseReason) -> bool {
        if self.state.is_closed() {
            return false;
        }
        self.state = SessionState::Closed(reason);
        log::info!("{} epoch {}: closed ({:?})", self.target, self.epoch, reason);
        true
    }
}

/// Serializable view of one active session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub camera_id: String,
    pub channel: u32,
    pub codec: CodecFamily,
    pub state: SessionState,
    pub ready: bool,
    pub epoch: u64,
    pub frames_presented: u64,
    pub units_dropped: u64,
    pub errors: Vec<events::ErrorCategory>,
}

impl SessionStatus {
    pub fn initial(target: &StreamTarget, epoch: u64) -> Self {
        Self {
            camera_id: target.camera_id.clone(),
            channel: target.channel,
            codec: target.codec.unwrap_or(CodecFamily::Unknown),
            state: SessionState::Idle,
            ready: false,
            epoch,
            frames_presented: 0,
            units_dropped: 0,
            errors: Vec::new(),
        }
    }
}
