use std::{
    collections::BTreeSet,
    fmt::{Display, Formatter},
};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::session::{CloseReason, SessionState};

/// Error states shown on a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    /// No decoding capability on this host.
    PlatformUnsupported,
    /// The stream's codec profile cannot be decoded here.
    DeviceUnsupported,
    ConnectFailed,
    ConnectClosed,
    DecodeFailed,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::PlatformUnsupported => "platform-unsupported",
            ErrorCategory::DeviceUnsupported => "device-unsupported",
            ErrorCategory::ConnectFailed => "connect-failed",
            ErrorCategory::ConnectClosed => "connect-closed",
            ErrorCategory::DecodeFailed => "decode-failed",
        }
    }
}

impl Display for ErrorCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SessionEventKind {
    StateChanged(SessionState),
    LoadingChanged(bool),
    Error(ErrorCategory),
    ErrorCleared(ErrorCategory),
    Ready,
    StopPlayback(CloseReason),
}

/// Event raised by a session, tagged with the generation that raised it.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionEvent {
    pub camera_id: String,
    pub epoch: u64,
    pub kind: SessionEventKind,
}

pub type SessionEventSender = mpsc::UnboundedSender<SessionEvent>;
pub type SessionEventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Tracks which error categories are currently raised.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    active: BTreeSet<ErrorCategory>,
}

impl ErrorReporter {
    /// Returns `true` only when `category` was not already raised.
    pub fn raise(&mut self, category: ErrorCategory) -> bool {
        self.active.insert(category)
    }

    pub fn clear(&mut self, category: ErrorCategory) -> bool {
        self.active.remove(&category)
    }

    pub fn is_raised(&self, category: ErrorCategory) -> bool {
        self.active.contains(&category)
    }

    pub fn active(&self) -> Vec<ErrorCategory> {
        self.active.iter().copied().collect()
    }
}

/// Sends a session's events to the pool.
#[derive(Debug)]
pub struct EventEmitter {
    camera_id: String,
    epoch: u64,
    tx: SessionEventSender,
    errors: ErrorReporter,
    loading: Option<bool>,
}

impl EventEmitter {
    pub fn new(camera_id: impl Into<String>, epoch: u64, tx: SessionEventSender) -> Self {
        Self {
            camera_id: camera_id.into(),
            epoch,
            tx,
            errors: ErrorReporter::default(),
            loading: None,
        }
    }

    pub fn errors(&self) -> &ErrorReporter {
        &self.errors
    }

    fn emit(&self, kind: SessionEventKind) {
        let event = SessionEvent {
            camera_id: self.camera_id.clone(),
            epoch: self.epoch,
            kind,
        };
        if self.tx.send(event).is_err() {
            log::trace!("{}: event receiver gone", self.camera_id);
        }
    }

    pub fn state(&self, state: SessionState) {
        self.emit(SessionEventKind::StateChanged(state));
    }

    pub fn loading(&mut self, loading: bool) {
        if self.loading == Some(loading) {
            return;
        }
        self.loading = Some(loading);
        self.emit(SessionEventKind::LoadingChanged(loading));
    }

    pub fn error(&mut self, category: ErrorCategory) {
        if self.errors.raise(category) {
            log::warn!("{} epoch {}: {}", self.camera_id, self.epoch, category);
            self.emit(SessionEventKind::Error(category));
        }
    }

    pub fn clear(&mut self, category: ErrorCategory) {
        if self.errors.clear(category) {
            self.emit(SessionEventKind::ErrorCleared(category));
        }
    }

    pub fn ready(&self) {
        self.emit(SessionEventKind::Ready);
    }

    pub fn stop_playback(&self, reason: CloseReason) {
        self.emit(SessionEventKind::StopPlayback(reason));
    }
}
