//! Live decode path for one camera channel.
//!
//! Data Flow:
//! ```text
//! transport message ──► nal::classify ──► DecodeGate ──► VideoDecoder ──► RenderSurface
//!   (Annex-B bytes)      (codec, key?)     (drop until     (ffmpeg-bus      (resize, draw,
//!                                           keyframe)       DecoderTask)     release)
//! ```

pub mod decoder;
pub mod gate;
pub mod nal;
pub mod render;
pub mod types;
