/// Registers FFmpeg components. Call once at startup before opening decoders.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("ffmpeg_next init: {}", e))
}

pub mod decoder;
pub mod frame;
pub mod hw;
pub mod packet;
pub mod scaler;
