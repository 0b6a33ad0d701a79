use bytes::Bytes;

use crate::media::{
    nal,
    types::{CodecFamily, CodecProfile, EncodedChunk, HardwareAcceleration},
};

/// Holds decoding back until a random-access unit arrives.
///
/// Also owns codec resolution for the session: the first buffer that classifies
/// as H.264 or H.265 fixes the family for good, otherwise the declared default
/// is used.
#[derive(Debug)]
pub struct DecodeGate {
    declared: Option<CodecFamily>,
    detected: Option<CodecFamily>,
    hardware_acceleration: HardwareAcceleration,
    waiting_for_keyframe: bool,
    next_timestamp: i64,
    dropped: u64,
    forwarded: u64,
}

impl DecodeGate {
    pub fn new(
        declared: Option<CodecFamily>,
        hardware_acceleration: HardwareAcceleration,
    ) -> Self {
        Self {
            declared: declared.filter(|c| c.is_known()),
            detected: None,
            hardware_acceleration,
            waiting_for_keyframe: true,
            next_timestamp: 0,
            dropped: 0,
            forwarded: 0,
        }
    }

    /// Re-arms the gate: nothing is forwarded until the next key unit.
    pub fn arm(&mut self) {
        self.waiting_for_keyframe = true;
    }

    pub fn is_waiting_for_keyframe(&self) -> bool {
        self.waiting_for_keyframe
    }

    pub fn detected(&self) -> Option<CodecFamily> {
        self.detected
    }

    /// Family used for frame-kind detection: detected, else declared, else unknown.
    pub fn family(&self) -> CodecFamily {
        self.detected
            .or(self.declared)
            .unwrap_or(CodecFamily::Unknown)
    }

    pub fn profile(&self) -> CodecProfile {
        CodecProfile::new(self.family(), self.hardware_acceleration)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Classifies `data` and decides whether it goes to the decoder.
    ///
    /// Returns `None` when the unit is dropped while waiting for a key frame.
    pub fn admit(&mut self, data: Bytes) -> Option<EncodedChunk> {
        if self.detected.is_none() {
            let found = nal::detect_codec(&data);
            if found.is_known() {
                if let Some(declared) = self.declared {
                    if declared != found {
                        log::warn!("declared codec {} but stream is {}", declared, found);
                    }
                }
                log::info!("codec detected: {}", found);
                self.detected = Some(found);
            }
        }

        let unit = nal::classify(data, self.family());
        if self.waiting_for_keyframe {
            if !unit.is_key() {
                self.dropped += 1;
                log::trace!("waiting for keyframe, dropped {} units", self.dropped);
                return None;
            }
            log::debug!("keyframe received after {} dropped units", self.dropped);
            self.waiting_for_keyframe = false;
        }

        let timestamp = self.next_timestamp;
        self.next_timestamp += 1;
        self.forwarded += 1;
        Some(EncodedChunk {
            kind: unit.kind,
            timestamp,
            data: unit.data,
        })
    }
}

#[cfg(test)]
#[path = "gate_test.rs"]
mod gate_test;
