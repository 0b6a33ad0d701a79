//! Annex-B bitstream classification.
//!
//! Camera messages carry raw NAL units separated by `00 00 01` / `00 00 00 01`
//! start codes, with no container around them. Codec family and random-access
//! status are inferred straight from the NAL header bytes.

use bytes::Bytes;

use crate::media::types::{AccessUnit, CodecFamily, FrameKind};

const H264_IDR: u8 = 5;
const H264_SPS: u8 = 7;
const H264_PPS: u8 = 8;

const H265_IDR_W_RADL: u8 = 19;
const H265_IDR_N_LP: u8 = 20;
const H265_VPS: u8 = 32;
const H265_PPS: u8 = 34;

fn h264_type(header: u8) -> u8 {
    header & 0x1F
}

fn h265_type(header: u8) -> u8 {
    (header >> 1) & 0x3F
}

/// The low bit of an H.265 header is the top bit of `nuh_layer_id`, which is
/// zero for every base-layer unit a camera sends.
fn h265_base_layer(header: u8) -> bool {
    header & 0x01 == 0
}

/// Iterator over the first header byte of every NAL unit in an Annex-B buffer.
pub struct NalHeaders<'a> {
    buf: &'a [u8],
    pos: usize,
}

pub fn nal_headers(buf: &[u8]) -> NalHeaders<'_> {
    NalHeaders { buf, pos: 0 }
}

impl Iterator for NalHeaders<'_> {
    type Item = u8;

    fn next(&mut self) -> Option<u8> {
        let b = self.buf;
        // A start code only counts when its header byte is inside the buffer.
        while self.pos + 3 < b.len() {
            let i = self.pos;
            if b[i] == 0 && b[i + 1] == 0 {
                if b[i + 2] == 1 {
                    self.pos = i + 3;
                    return Some(b[i + 3]);
                }
                if b[i + 2] == 0 && b[i + 3] == 1 && i + 4 < b.len() {
                    self.pos = i + 4;
                    return Some(b[i + 4]);
                }
            }
            self.pos += 1;
        }
        None
    }
}

/// Detects the codec family from the first unambiguous NAL header.
///
/// Every header is read both as H.264 and as H.265. A header that matches one
/// family's IDR/parameter-set types and not the other's decides the result; a
/// header matching both (e.g. `0x28`) is skipped. H.265 readings outside the
/// base layer are ignored, so H.264 P-slices with `nal_ref_idc = 2` (`0x41`)
/// are not taken for a VPS.
pub fn detect_codec(buf: &[u8]) -> CodecFamily {
    for header in nal_headers(buf) {
        let avc = matches!(h264_type(header), H264_IDR | H264_SPS | H264_PPS);
        let hevc = h265_base_layer(header)
            && matches!(
                h265_type(header),
                H265_IDR_W_RADL | H265_IDR_N_LP | H265_VPS..=H265_PPS
            );
        match (avc, hevc) {
            (true, false) => return CodecFamily::H264,
            (false, true) => return CodecFamily::H265,
            _ => continue,
        }
    }
    CodecFamily::Unknown
}

/// Whether the buffer starts a random-access point for `family`.
///
/// The decision is made on the first coded slice: IDR for H.264, BLA/IDR
/// (types 16..=20) for H.265. Parameter sets and SEI ahead of the slice are
/// skipped. A buffer with no slice at all is not key for a known family.
/// Unknown family is fail-open.
pub fn is_key_frame(buf: &[u8], family: CodecFamily) -> bool {
    if family == CodecFamily::Unknown {
        return true;
    }
    for header in nal_headers(buf) {
        match family {
            CodecFamily::H264 => {
                if let t @ 1..=5 = h264_type(header) {
                    return t == H264_IDR;
                }
            }
            CodecFamily::H265 => {
                if let t @ 0..=31 = h265_type(header) {
                    return (16..=20).contains(&t);
                }
            }
            CodecFamily::Unknown => return true,
        }
    }
    false
}

/// Classifies one transport message against a known (possibly unknown) family.
pub fn classify(data: Bytes, family: CodecFamily) -> AccessUnit {
    let kind = if is_key_frame(&data, family) {
        FrameKind::Key
    } else {
        FrameKind::Delta
    };
    AccessUnit {
        data,
        kind,
        codec: family,
    }
}

#[cfg(test)]
#[path = "nal_test.rs"]
mod nal_test;
