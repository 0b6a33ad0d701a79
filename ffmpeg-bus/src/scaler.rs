use ffmpeg_next::{
    format::Pixel,
    software::scaling::{Context, Flags},
};

/// Converts decoded frames to packed RGB24.
///
/// The scaling context is rebuilt whenever the source format or dimensions change,
/// which happens on live streams when the camera switches resolution.
pub struct Scaler {
    context: Option<Context>,
    source: (Pixel, u32, u32),
}

impl Scaler {
    pub fn new() -> Self {
        Self {
            context: None,
            source: (Pixel::None, 0, 0),
        }
    }

    pub fn run(
        &mut self,
        frame: &ffmpeg_next::frame::Video,
        dst: &mut ffmpeg_next::frame::Video,
    ) -> anyhow::Result<()> {
        let source = (frame.format(), frame.width(), frame.height());
        if self.context.is_none() || self.source != source {
            log::debug!(
                "scaler: rebuild for {:?} {}x{}",
                source.0,
                source.1,
                source.2
            );
            self.context = Some(Context::get(
                source.0,
                source.1,
                source.2,
                Pixel::RGB24,
                source.1,
                source.2,
                Flags::BILINEAR,
            )?);
            self.source = source;
        }

        match self.context.as_mut() {
            Some(context) => context.run(frame, dst).map_err(|e| e.into()),
            None => Err(anyhow::anyhow!("scaler context missing")),
        }
    }
}

impl Default for Scaler {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl Send for Scaler {}
