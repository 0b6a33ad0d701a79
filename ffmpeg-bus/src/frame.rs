use std::fmt::{Display, Formatter};

use bytes::Bytes;

use crate::scaler::Scaler;

/// Decoded video frame as packed RGB24 (`width * height * 3` bytes, no padding).
#[derive(Debug, Default, Clone)]
pub struct VideoFrame {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
    pub pts: i64,
    pub is_key: bool,
}

impl VideoFrame {
    /// Converts a decoder output frame, whatever its pixel format, into packed RGB24.
    pub fn from_decoded(
        frame: &ffmpeg_next::frame::Video,
        scaler: &mut Scaler,
    ) -> anyhow::Result<Self> {
        let width = frame.width();
        let height = frame.height();
        if width == 0 || height == 0 {
            anyhow::bail!("invalid video size {}x{}", width, height);
        }

        let mut rgb = ffmpeg_next::frame::Video::empty();
        scaler.run(frame, &mut rgb)?;

        let row_len = width as usize * 3;
        let stride = rgb.stride(0);
        let plane = rgb.data(0);
        let mut data = Vec::with_capacity(row_len * height as usize);
        for row in 0..height as usize {
            let start = row * stride;
            let end = start + row_len;
            if end > plane.len() {
                anyhow::bail!("rgb plane too short: {} < {}", plane.len(), end);
            }
            data.extend_from_slice(&plane[start..end]);
        }

        Ok(Self {
            data: Bytes::from(data),
            width,
            height,
            pts: frame.pts().unwrap_or(0),
            is_key: frame.is_key(),
        })
    }
}

impl Display for VideoFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "VideoFrame data_len: {}, width: {}, height: {}, pts: {}, is_key: {}",
            self.data.len(),
            self.width,
            self.height,
            self.pts,
            self.is_key
        )
    }
}
