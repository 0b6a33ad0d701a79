use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use jpeg_encoder::{ColorType, Encoder};

use crate::media::types::DecodedFrame;

/// Where decoded frames end up.
///
/// Frames are borrowed for the duration of `draw` only; the surface drops them
/// right after.
pub trait RenderSink: Send {
    fn show_placeholder(&mut self);

    fn resize(&mut self, width: u32, height: u32) -> anyhow::Result<()>;

    fn draw(&mut self, frame: &DecodedFrame) -> anyhow::Result<()>;

    fn reveal(&mut self, fade: Duration);
}

pub trait SinkFactory: Send + Sync {
    fn create(&self, camera_id: &str, channel: u32) -> Box<dyn RenderSink>;
}

pub type SharedSinkFactory = Arc<dyn SinkFactory>;

/// Drives a [`RenderSink`] for one session.
pub struct RenderSurface {
    sink: Box<dyn RenderSink>,
    dimensions: Option<(u32, u32)>,
    ready: bool,
    fade: Duration,
    presented: u64,
}

impl RenderSurface {
    pub fn new(mut sink: Box<dyn RenderSink>, fade: Duration) -> Self {
        sink.show_placeholder();
        Self {
            sink,
            dimensions: None,
            ready: false,
            fade,
            presented: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.dimensions
    }

    /// Draws `frame` and releases it.
    ///
    /// Returns `true` only for the frame that made the surface ready.
    pub fn present(&mut self, frame: DecodedFrame) -> anyhow::Result<bool> {
        let dimensions = frame.dimensions();
        if self.dimensions != Some(dimensions) {
            log::debug!(
                "surface resize {:?} -> {}x{}",
                self.dimensions,
                dimensions.0,
                dimensions.1
            );
            self.sink.resize(dimensions.0, dimensions.1)?;
            self.dimensions = Some(dimensions);
        }

        let drawn = self.sink.draw(&frame);
        drop(frame);
        drawn?;
        self.presented += 1;

        if self.ready {
            return Ok(false);
        }
        self.ready = true;
        self.sink.reveal(self.fade);
        Ok(true)
    }
}

/// Logs surface changes; used when snapshots are disabled.
pub struct LogSink {
    label: String,
}

impl LogSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl RenderSink for LogSink {
    fn show_placeholder(&mut self) {
        log::debug!("{}: loading", self.label);
    }

    fn resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        log::debug!("{}: surface {}x{}", self.label, width, height);
        Ok(())
    }

    fn draw(&mut self, frame: &DecodedFrame) -> anyhow::Result<()> {
        log::trace!("{}: {}", self.label, frame);
        Ok(())
    }

    fn reveal(&mut self, fade: Duration) {
        log::info!("{}: showing video (fade {:?})", self.label, fade);
    }
}

/// Keeps `camera_{id}_{channel}.jpg` up to date with the latest frame.
pub struct JpegSnapshotSink {
    path: PathBuf,
    interval: Duration,
    quality: u8,
    last_written: Option<Instant>,
    written: u64,
}

impl JpegSnapshotSink {
    pub fn new(dir: &Path, camera_id: &str, channel: u32, interval: Duration) -> Self {
        Self {
            path: dir.join(snapshot_file_name(camera_id, channel)),
            interval,
            quality: 85,
            last_written: None,
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn due(&self, now: Instant) -> bool {
        self.last_written
            .is_none_or(|last| now.duration_since(last) >= self.interval)
    }
}

pub fn snapshot_file_name(camera_id: &str, channel: u32) -> String {
    let safe: String = camera_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("camera_{}_{}.jpg", safe, channel)
}

impl RenderSink for JpegSnapshotSink {
    fn show_placeholder(&mut self) {}

    fn resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        if width > u16::MAX as u32 || height > u16::MAX as u32 {
            anyhow::bail!("frame too large for jpeg: {}x{}", width, height);
        }
        Ok(())
    }

    fn draw(&mut self, frame: &DecodedFrame) -> anyhow::Result<()> {
        let now = Instant::now();
        if !self.due(now) {
            return Ok(());
        }

        let mut jpeg = Vec::new();
        Encoder::new(&mut jpeg, self.quality).encode(
            &frame.data,
            frame.width as u16,
            frame.height as u16,
            ColorType::Rgb,
        )?;

        // Write to a sibling file first so readers never see a partial image.
        let tmp = self.path.with_extension("jpg.tmp");
        std::fs::write(&tmp, &jpeg)?;
        std::fs::rename(&tmp, &self.path)?;

        self.last_written = Some(now);
        self.written += 1;
        Ok(())
    }

    fn reveal(&mut self, _fade: Duration) {
        log::info!("snapshots: {}", self.path.display());
    }
}

/// Picks the sink per session: JPEG snapshots when a directory is configured.
pub struct DefaultSinkFactory {
    snapshot_dir: Option<PathBuf>,
    snapshot_interval: Duration,
}

impl DefaultSinkFactory {
    pub fn new(snapshot_dir: Option<PathBuf>, snapshot_interval: Duration) -> Self {
        Self {
            snapshot_dir,
            snapshot_interval,
        }
    }
}

impl SinkFactory for DefaultSinkFactory {
    fn create(&self, camera_id: &str, channel: u32) -> Box<dyn RenderSink> {
        match &self.snapshot_dir {
            Some(dir) => Box::new(JpegSnapshotSink::new(
                dir,
                camera_id,
                channel,
                self.snapshot_interval,
            )),
            None => Box::new(LogSink::new(format!("{}/{}", camera_id, channel))),
        }
    }
}

#[cfg(test)]
#[path = "render_test.rs"]
mod render_test;
