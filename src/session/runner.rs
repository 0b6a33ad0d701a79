use std::{collections::VecDeque, time::Duration};

use bytes::Bytes;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    media::{
        decoder::{
            DecoderEvent, DecoderEventReceiver, DecoderEventSender, SharedDecoderFactory,
            VideoDecoder,
        },
        gate::DecodeGate,
        render::{RenderSurface, SharedSinkFactory},
        types::{CodecProfile, HardwareAcceleration},
    },
    session::{
        CloseReason, SessionState, SessionStatus, StreamSession, StreamTarget,
        events::{ErrorCategory, EventEmitter, SessionEventSender},
        transport::{CLOSE_BY_USER, SharedConnector, TransportEvent, TransportHandle},
    },
};

const DECODER_EVENT_BUFFER: usize = 32;

#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// Delay between transport open and the first decoder submission.
    pub warmup: Duration,
    pub fade_in: Duration,
    pub hardware_acceleration: HardwareAcceleration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            warmup: Duration::from_millis(100),
            fade_in: Duration::from_millis(300),
            hardware_acceleration: HardwareAcceleration::NoPreference,
        }
    }
}

/// Collaborators shared by every session of a pool.
#[derive(Clone)]
pub struct SessionContext {
    pub connector: SharedConnector,
    pub decoders: SharedDecoderFactory,
    pub sinks: SharedSinkFactory,
    pub settings: SessionSettings,
    pub events: SessionEventSender,
}

/// Owner's side of a running session task.
pub struct SessionHandle {
    target: StreamTarget,
    epoch: u64,
    close_tx: Option<oneshot::Sender<CloseReason>>,
    task: Option<JoinHandle<CloseReason>>,
    status: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub fn spawn(target: StreamTarget, epoch: u64, ctx: SessionContext) -> Self {
        let (close_tx, close_rx) = oneshot::channel();
        let (status_tx, status) = watch::channel(SessionStatus::initial(&target, epoch));
        let runner = SessionRunner::new(target.clone(), epoch, ctx, status_tx);
        let task = tokio::spawn(runner.run(close_rx));
        Self {
            target,
            epoch,
            close_tx: Some(close_tx),
            task: Some(task),
            status,
        }
    }

    pub fn target(&self) -> &StreamTarget {
        &self.target
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Closes the session with `reason` and waits for its teardown.
    ///
    /// Returns the reason the session actually closed with, which differs from
    /// `reason` when it had already closed on its own. Later calls return `None`.
    pub async fn close(&mut self, reason: CloseReason) -> Option<CloseReason> {
        if let Some(close_tx) = self.close_tx.take() {
            let _ = close_tx.send(reason);
        }
        let task = self.task.take()?;
        match task.await {
            Ok(closed) => Some(closed),
            Err(e) => {
                log::error!("{} epoch {}: session task failed: {}", self.target, self.epoch, e);
                None
            }
        }
    }
}

struct SessionRunner {
    session: StreamSession,
    emitter: EventEmitter,
    gate: DecodeGate,
    surface: RenderSurface,
    decoder: Option<Box<dyn VideoDecoder>>,
    decoder_profile: Option<CodecProfile>,
    decoder_tx: DecoderEventSender,
    decoder_rx: Option<DecoderEventReceiver>,
    status_tx: watch::Sender<SessionStatus>,
    ctx: SessionContext,
}

impl SessionRunner {
    fn new(
        target: StreamTarget,
        epoch: u64,
        ctx: SessionContext,
        status_tx: watch::Sender<SessionStatus>,
    ) -> Self {
        let emitter = EventEmitter::new(target.camera_id.clone(), epoch, ctx.events.clone());
        let gate = DecodeGate::new(target.codec, ctx.settings.hardware_acceleration);
        let sink = ctx.sinks.create(&target.camera_id, target.channel);
        let surface = RenderSurface::new(sink, ctx.settings.fade_in);
        let (decoder_tx, decoder_rx) = mpsc::channel(DECODER_EVENT_BUFFER);
        Self {
            session: StreamSession::new(target, epoch),
            emitter,
            gate,
            surface,
            decoder: None,
            decoder_profile: None,
            decoder_tx,
            decoder_rx: Some(decoder_rx),
            status_tx,
            ctx,
        }
    }

    async fn run(mut self, mut close_rx: oneshot::Receiver<CloseReason>) -> CloseReason {
        if let Err(e) = self.ctx.decoders.probe() {
            log::error!("{}: no decoder available: {:#}", self.session.target(), e);
            self.emitter.error(ErrorCategory::PlatformUnsupported);
            return self.finish(CloseReason::DecodeFatal, None).await;
        }

        self.enter(SessionState::Connecting);
        self.emitter.loading(true);

        let connect = self.ctx.connector.connect(self.session.target());
        let mut transport = tokio::select! {
            reason = &mut close_rx => {
                return self.finish(reason.unwrap_or(CloseReason::UserClosed), None).await;
            }
            res = connect => match res {
                Ok(transport) => transport,
                Err(e) => {
                    log::warn!("{}: connect failed: {:#}", self.session.target(), e);
                    self.emitter.error(ErrorCategory::ConnectFailed);
                    return self.finish(CloseReason::TransportError, None).await;
                }
            },
        };

        self.enter(SessionState::WaitingFirstFrame);
        self.gate.arm();

        let reason = self.stream(&mut transport, &mut close_rx).await;
        self.finish(reason, Some(transport)).await
    }

    /// Event loop while the transport is open. Returns why it stopped.
    async fn stream(
        &mut self,
        transport: &mut TransportHandle,
        close_rx: &mut oneshot::Receiver<CloseReason>,
    ) -> CloseReason {
        let Some(mut decoder_rx) = self.decoder_rx.take() else {
            return CloseReason::DecodeFatal;
        };
        let warmup = tokio::time::sleep(self.ctx.settings.warmup);
        tokio::pin!(warmup);
        let mut pending: Option<VecDeque<Bytes>> = Some(VecDeque::new());

        loop {
            tokio::select! {
                reason = &mut *close_rx => {
                    return reason.unwrap_or(CloseReason::UserClosed);
                }
                _ = &mut warmup, if pending.is_some() => {
                    for data in pending.take().unwrap_or_default() {
                        if let Err(reason) = self.handle_unit(data) {
                            return reason;
                        }
                    }
                }
                event = transport.recv() => match event {
                    Some(TransportEvent::Message(data)) => match pending.as_mut() {
                        Some(pending) => pending.push_back(data),
                        None => {
                            if let Err(reason) = self.handle_unit(data) {
                                return reason;
                            }
                        }
                    },
                    Some(TransportEvent::Closed { code, reason }) => {
                        log::info!(
                            "{}: remote closed (code {:?}, reason {:?})",
                            self.session.target(),
                            code,
                            reason
                        );
                        if reason == CLOSE_BY_USER {
                            return CloseReason::UserClosed;
                        }
                        self.emitter.error(ErrorCategory::ConnectClosed);
                        return CloseReason::RemoteClosed;
                    }
                    Some(TransportEvent::Error(e)) => {
                        log::warn!("{}: transport error: {}", self.session.target(), e);
                        self.emitter.error(ErrorCategory::ConnectFailed);
                        return CloseReason::TransportError;
                    }
                    None => {
                        self.emitter.error(ErrorCategory::ConnectClosed);
                        return CloseReason::RemoteClosed;
                    }
                },
                Some(event) = decoder_rx.recv() => {
                    if let Err(reason) = self.handle_decoder_event(event) {
                        return reason;
                    }
                }
            }
        }
    }

    fn handle_unit(&mut self, data: Bytes) -> Result<(), CloseReason> {
        let chunk = self.gate.admit(data);
        self.publish();
        let Some(chunk) = chunk else {
            return Ok(());
        };

        let profile = self.gate.profile();
        if self.decoder_profile.as_ref() != Some(&profile) {
            let reconfigure = self.decoder.is_some();
            self.open_decoder(profile)?;
            if reconfigure && !chunk.is_key() {
                // The new decoder needs a random-access point first.
                self.gate.arm();
                return Ok(());
            }
        }

        let Some(decoder) = self.decoder.as_mut() else {
            return Err(CloseReason::DecodeFatal);
        };
        if let Err(e) = decoder.decode(chunk) {
            log::warn!("{}: decode submit failed: {:#}", self.session.target(), e);
            self.emitter.error(ErrorCategory::DecodeFailed);
        }
        Ok(())
    }

    fn open_decoder(&mut self, profile: CodecProfile) -> Result<(), CloseReason> {
        self.release_decoder();

        if !self.ctx.decoders.is_supported(&profile) {
            log::error!("{}: {} not supported", self.session.target(), profile.codec());
            self.emitter.error(ErrorCategory::DeviceUnsupported);
            return Err(CloseReason::DecodeFatal);
        }
        match self.ctx.decoders.create(&profile, self.decoder_tx.clone()) {
            Ok(decoder) => {
                log::info!("{}: decoder configured for {}", self.session.target(), profile.codec());
                self.decoder = Some(decoder);
                self.decoder_profile = Some(profile);
                Ok(())
            }
            Err(e) => {
                log::error!("{}: decoder configure failed: {:#}", self.session.target(), e);
                self.emitter.error(ErrorCategory::DeviceUnsupported);
                Err(CloseReason::DecodeFatal)
            }
        }
    }

    fn handle_decoder_event(&mut self, event: DecoderEvent) -> Result<(), CloseReason> {
        match event {
            DecoderEvent::Frame(frame) => {
                match self.surface.present(frame) {
                    Ok(first) => {
                        self.emitter.clear(ErrorCategory::DecodeFailed);
                        if first {
                            self.emitter.loading(false);
                            self.emitter.ready();
                        }
                        if self.session.state() == SessionState::WaitingFirstFrame {
                            self.enter(SessionState::Streaming);
                        }
                    }
                    Err(e) => log::warn!("{}: render failed: {:#}", self.session.target(), e),
                }
                self.publish();
                Ok(())
            }
            DecoderEvent::Error(e) => {
                log::warn!("{}: decode error: {}", self.session.target(), e);
                self.emitter.error(ErrorCategory::DecodeFailed);
                self.publish();
                Ok(())
            }
            DecoderEvent::Fatal(e) => {
                log::error!("{}: decoder failed: {}", self.session.target(), e);
                self.emitter.error(ErrorCategory::DecodeFailed);
                Err(CloseReason::DecodeFatal)
            }
        }
    }

    fn enter(&mut self, state: SessionState) {
        if self.session.transition(state).is_ok() {
            self.emitter.state(state);
            self.publish();
        }
    }

    fn release_decoder(&mut self) {
        if let Some(mut decoder) = self.decoder.take() {
            decoder.close();
        }
        self.decoder_profile = None;
    }

    /// Releases decoder and transport, then closes the session.
    async fn finish(
        mut self,
        reason: CloseReason,
        transport: Option<TransportHandle>,
    ) -> CloseReason {
        self.release_decoder();
        if let Some(mut transport) = transport {
            transport.close().await;
        }

        if self.session.close(reason) {
            self.emitter.loading(false);
            self.emitter.state(SessionState::Closed(reason));
            if reason.stops_playback() {
                self.emitter.stop_playback(reason);
            }
        }
        self.publish();
        reason
    }

    fn publish(&self) {
        let target = self.session.target();
        self.status_tx.send_replace(SessionStatus {
            camera_id: target.camera_id.clone(),
            channel: target.channel,
            codec: self.gate.family(),
            state: self.session.state(),
            ready: self.surface.is_ready(),
            epoch: self.session.epoch(),
            frames_presented: self.surface.presented(),
            units_dropped: self.gate.dropped(),
            errors: self.emitter.errors().active(),
        });
    }
}
