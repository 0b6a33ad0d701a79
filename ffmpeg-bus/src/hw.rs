//! Hardware-accelerated decoder discovery.
//!
//! Live camera streams are H.264 or HEVC only, so discovery is limited to those two
//! codecs. The software decoder is always the last candidate.

/// Preference passed along with the codec when a decoder is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum HwPreference {
    PreferHardware,
    PreferSoftware,
    #[default]
    NoPreference,
}

/// Maps a codec identifier ("h264", "h265", "hevc") to the FFmpeg codec id.
pub fn codec_id_from_name(name: &str) -> Option<ffmpeg_next::codec::Id> {
    match name.to_ascii_lowercase().as_str() {
        "h264" | "avc" => Some(ffmpeg_next::codec::Id::H264),
        "h265" | "hevc" => Some(ffmpeg_next::codec::Id::HEVC),
        _ => None,
    }
}

/// Hardware decoder names for `codec_id`, best first.
pub fn hw_decoder_names(codec_id: ffmpeg_next::codec::Id) -> &'static [&'static str] {
    match codec_id {
        ffmpeg_next::codec::Id::H264 => &["h264_cuvid", "h264_qsv", "h264_rkmpp", "h264_v4l2m2m"],
        ffmpeg_next::codec::Id::HEVC => &["hevc_cuvid", "hevc_qsv", "hevc_rkmpp", "hevc_v4l2m2m"],
        _ => &[],
    }
}

/// Every hardware decoder registered for the given codec ID, in preference order.
/// Registration says nothing about the device being present.
pub fn find_hw_decoders(codec_id: ffmpeg_next::codec::Id) -> Vec<ffmpeg_next::Codec> {
    hw_decoder_names(codec_id)
        .iter()
        .filter_map(|name| {
            let codec = ffmpeg_next::decoder::find_by_name(name)?;
            log::debug!("found hardware decoder: {}", name);
            Some(codec)
        })
        .collect()
}

/// Decoders to try for `codec_id` honoring `preference`, in order.
///
/// `PreferHardware` and `NoPreference` list the hardware decoders first and end
/// with FFmpeg's built-in decoder; `PreferSoftware` lists only the built-in one.
pub fn decoder_candidates(
    codec_id: ffmpeg_next::codec::Id,
    preference: HwPreference,
) -> Vec<ffmpeg_next::Codec> {
    let mut candidates = Vec::new();
    if preference != HwPreference::PreferSoftware {
        candidates = find_hw_decoders(codec_id);
        if candidates.is_empty() && preference == HwPreference::PreferHardware {
            log::warn!("no hardware decoder for {:?}, falling back to software", codec_id);
        }
    }
    if let Some(software) = ffmpeg_next::decoder::find(codec_id) {
        candidates.push(software);
    }
    candidates
}
