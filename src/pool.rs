//! Bounded set of live sessions, one tile per camera.
//!
//! Sessions are kept in activation order; when the pool is full the oldest
//! activation is evicted first, whatever its recent activity.

use std::{collections::VecDeque, sync::Arc};

use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::session::{
    CloseReason, SessionStatus, StreamTarget,
    events::{SessionEvent, SessionEventKind, SessionEventReceiver},
    runner::{SessionContext, SessionHandle},
};

pub const DEFAULT_MAX_SESSIONS: usize = 4;

pub type SharedPool = Arc<Mutex<SessionPool>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "kebab-case")]
pub enum Activation {
    Started { epoch: u64, evicted: Vec<String> },
    Stopped,
}

pub struct SessionPool {
    ctx: SessionContext,
    max_sessions: usize,
    active: VecDeque<SessionHandle>,
    next_epoch: u64,
}

impl SessionPool {
    pub fn new(ctx: SessionContext, max_sessions: usize) -> Self {
        Self {
            ctx,
            max_sessions: max_sessions.max(1),
            active: VecDeque::new(),
            next_epoch: 1,
        }
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    pub fn is_active(&self, camera_id: &str) -> bool {
        self.position(camera_id).is_some()
    }

    /// Camera ids in activation order, oldest first.
    pub fn active_ids(&self) -> Vec<String> {
        self.active
            .iter()
            .map(|s| s.target().camera_id.clone())
            .collect()
    }

    fn position(&self, camera_id: &str) -> Option<usize> {
        self.active
            .iter()
            .position(|s| s.target().camera_id == camera_id)
    }

    fn spawn(&mut self, target: StreamTarget) -> SessionHandle {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        log::info!("session {} starting, epoch {}", target, epoch);
        SessionHandle::spawn(target, epoch, self.ctx.clone())
    }

    /// Toggles the tile for `target.camera_id`.
    ///
    /// An active camera is switched off. Otherwise, when the pool is full the
    /// oldest sessions are torn down before the new one starts.
    pub async fn activate(&mut self, target: StreamTarget) -> anyhow::Result<Activation> {
        if target.camera_id.is_empty() {
            anyhow::bail!("camera id is required");
        }
        if self.deactivate(&target.camera_id).await {
            return Ok(Activation::Stopped);
        }

        let mut evicted = Vec::new();
        while self.active.len() >= self.max_sessions {
            let Some(mut oldest) = self.active.pop_front() else {
                break;
            };
            log::info!(
                "pool full ({}), evicting {}",
                self.max_sessions,
                oldest.target()
            );
            oldest.close(CloseReason::UserClosed).await;
            evicted.push(oldest.target().camera_id.clone());
        }

        let handle = self.spawn(target);
        let epoch = handle.epoch();
        self.active.push_back(handle);
        Ok(Activation::Started { epoch, evicted })
    }

    /// Closes the session for `camera_id`. Returns `false` when it was not active.
    pub async fn deactivate(&mut self, camera_id: &str) -> bool {
        let Some(idx) = self.position(camera_id) else {
            return false;
        };
        if let Some(mut handle) = self.active.remove(idx) {
            handle.close(CloseReason::UserClosed).await;
        }
        true
    }

    /// Restarts an active camera with new parameters in the same slot.
    ///
    /// Returns the epoch now serving the camera; unchanged parameters keep the
    /// running session.
    pub async fn update(&mut self, target: StreamTarget) -> anyhow::Result<u64> {
        let idx = self
            .position(&target.camera_id)
            .ok_or_else(|| anyhow::anyhow!("camera {} is not active", target.camera_id))?;

        if self.active[idx].target() == &target && !self.active[idx].is_finished() {
            return Ok(self.active[idx].epoch());
        }

        self.active[idx].close(CloseReason::Superseded).await;
        let handle = self.spawn(target);
        let epoch = handle.epoch();
        self.active[idx] = handle;
        Ok(epoch)
    }

    /// Applies a session event. Returns `false` for events from a stale epoch.
    pub async fn handle_event(&mut self, event: &SessionEvent) -> bool {
        let Some(idx) = self.position(&event.camera_id) else {
            log::trace!("dropping event for inactive camera {}", event.camera_id);
            return false;
        };
        if self.active[idx].epoch() != event.epoch {
            log::trace!(
                "dropping stale event for {} (epoch {} != {})",
                event.camera_id,
                event.epoch,
                self.active[idx].epoch()
            );
            return false;
        }

        match &event.kind {
            SessionEventKind::StopPlayback(reason) => {
                log::info!("{}: stop playback ({:?})", event.camera_id, reason);
                if let Some(mut handle) = self.active.remove(idx) {
                    handle.close(CloseReason::UserClosed).await;
                }
            }
            SessionEventKind::Error(category) => {
                log::warn!("{}: {}", event.camera_id, category);
            }
            kind => {
                log::debug!("{}: {:?}", event.camera_id, kind);
            }
        }
        true
    }

    pub fn snapshot(&self) -> Vec<SessionStatus> {
        self.active.iter().map(|s| s.status()).collect()
    }

    /// Closes every session, oldest first.
    pub async fn shutdown(&mut self) {
        while let Some(mut handle) = self.active.pop_front() {
            handle.close(CloseReason::UserClosed).await;
        }
        log::info!("session pool closed");
    }
}

/// Feeds session events into the pool until `cancel` fires.
pub async fn run_event_loop(
    pool: SharedPool,
    mut events: SessionEventReceiver,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => {
                    pool.lock().await.handle_event(&event).await;
                }
                None => break,
            },
        }
    }
    log::debug!("pool event loop finished");
}

#[cfg(test)]
#[path = "pool_test.rs"]
mod pool_test;
