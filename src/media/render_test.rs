// ============================================================================
// Render Surface Tests
// ============================================================================

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use bytes::Bytes;

use super::*;
use crate::media::types::{DecodedFrame, FrameLedger};

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Placeholder,
    Resize(u32, u32),
    Draw(i64),
    Reveal(Duration),
}

#[derive(Clone, Default)]
struct RecordingSink {
    ops: Arc<Mutex<Vec<Op>>>,
    ledger: Option<FrameLedger>,
    outstanding_during_draw: Arc<Mutex<Vec<usize>>>,
}

impl RenderSink for RecordingSink {
    fn show_placeholder(&mut self) {
        self.ops.lock().unwrap().push(Op::Placeholder);
    }

    fn resize(&mut self, width: u32, height: u32) -> anyhow::Result<()> {
        self.ops.lock().unwrap().push(Op::Resize(width, height));
        Ok(())
    }

    fn draw(&mut self, frame: &DecodedFrame) -> anyhow::Result<()> {
        if let Some(ledger) = &self.ledger {
            self.outstanding_during_draw
                .lock()
                .unwrap()
                .push(ledger.outstanding());
        }
        self.ops.lock().unwrap().push(Op::Draw(frame.timestamp));
        Ok(())
    }

    fn reveal(&mut self, fade: Duration) {
        self.ops.lock().unwrap().push(Op::Reveal(fade));
    }
}

fn frame(ledger: &FrameLedger, width: u32, height: u32, ts: i64) -> DecodedFrame {
    let data = Bytes::from(vec![0x80u8; (width * height * 3) as usize]);
    DecodedFrame::new(ledger, width, height, ts, data)
}

#[test]
fn test_ready_flips_once_with_fade() {
    let sink = RecordingSink::default();
    let ops = Arc::clone(&sink.ops);
    let ledger = FrameLedger::new();
    let mut surface = RenderSurface::new(Box::new(sink), Duration::from_millis(300));
    assert!(!surface.is_ready());

    assert!(surface.present(frame(&ledger, 4, 2, 0)).unwrap());
    assert!(!surface.present(frame(&ledger, 4, 2, 1)).unwrap());
    assert!(!surface.present(frame(&ledger, 4, 2, 2)).unwrap());
    assert!(surface.is_ready());
    assert_eq!(surface.presented(), 3);

    let ops = ops.lock().unwrap();
    assert_eq!(
        *ops,
        vec![
            Op::Placeholder,
            Op::Resize(4, 2),
            Op::Draw(0),
            Op::Reveal(Duration::from_millis(300)),
            Op::Draw(1),
            Op::Draw(2),
        ]
    );
}

#[test]
fn test_resize_only_on_dimension_change() {
    let sink = RecordingSink::default();
    let ops = Arc::clone(&sink.ops);
    let ledger = FrameLedger::new();
    let mut surface = RenderSurface::new(Box::new(sink), Duration::ZERO);

    surface.present(frame(&ledger, 4, 2, 0)).unwrap();
    surface.present(frame(&ledger, 4, 2, 1)).unwrap();
    surface.present(frame(&ledger, 8, 4, 2)).unwrap();
    surface.present(frame(&ledger, 8, 4, 3)).unwrap();

    let resizes: Vec<_> = ops
        .lock()
        .unwrap()
        .iter()
        .filter(|op| matches!(op, Op::Resize(..)))
        .cloned()
        .collect();
    assert_eq!(resizes, vec![Op::Resize(4, 2), Op::Resize(8, 4)]);
    assert_eq!(surface.dimensions(), Some((8, 4)));
}

#[test]
fn test_frames_released_after_draw() {
    let ledger = FrameLedger::new();
    let sink = RecordingSink {
        ledger: Some(ledger.clone()),
        ..Default::default()
    };
    let during = Arc::clone(&sink.outstanding_during_draw);
    let mut surface = RenderSurface::new(Box::new(sink), Duration::ZERO);

    for ts in 0..5 {
        surface.present(frame(&ledger, 2, 2, ts)).unwrap();
        assert_eq!(ledger.outstanding(), 0);
    }
    assert_eq!(*during.lock().unwrap(), vec![1; 5]);
}

#[test]
fn test_snapshot_file_name_is_sanitized() {
    assert_eq!(snapshot_file_name("1234", 0), "camera_1234_0.jpg");
    assert_eq!(snapshot_file_name("lumi.cam/1", 2), "camera_lumi_cam_1_2.jpg");
}

#[test]
fn test_jpeg_snapshot_sink_throttles() {
    let dir = std::env::temp_dir().join(format!("nvr-live-render-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();

    let ledger = FrameLedger::new();
    let mut sink = JpegSnapshotSink::new(&dir, "cam", 1, Duration::from_secs(60));
    sink.resize(16, 8).unwrap();
    sink.draw(&frame(&ledger, 16, 8, 0)).unwrap();
    sink.draw(&frame(&ledger, 16, 8, 1)).unwrap();
    assert_eq!(sink.written(), 1);

    let bytes = std::fs::read(sink.path()).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_jpeg_snapshot_rejects_oversized_frames() {
    let mut sink = JpegSnapshotSink::new(Path::new("/tmp"), "cam", 0, Duration::ZERO);
    assert!(sink.resize(70_000, 10).is_err());
}

#[test]
fn test_default_factory_picks_sink() {
    let factory = DefaultSinkFactory::new(None, Duration::from_millis(500));
    let mut sink = factory.create("cam", 0);
    assert!(sink.resize(1920, 1080).is_ok());
}
