use bytes::Bytes;

/// One access unit on its way into the decoder.
///
/// The live stream has no container, so the timestamp is whatever counter the
/// caller uses as a presentation surrogate.
#[derive(Clone)]
pub struct RawPacket {
    packet: ffmpeg_next::codec::packet::Packet,
}

impl RawPacket {
    pub fn new(data: &Bytes, timestamp: i64, is_key: bool) -> Self {
        let mut packet = ffmpeg_next::codec::packet::Packet::copy(data);
        packet.set_pts(Some(timestamp));
        packet.set_dts(Some(timestamp));
        if is_key {
            packet.set_flags(ffmpeg_next::codec::packet::Flags::KEY);
        }
        Self { packet }
    }

    pub fn pts(&self) -> Option<i64> {
        self.packet.pts()
    }

    pub fn size(&self) -> usize {
        self.packet.size()
    }

    pub fn is_key(&self) -> bool {
        self.packet.is_key()
    }

    /// Get a reference to the inner packet for FFmpeg calls.
    pub fn packet(&self) -> &ffmpeg_next::codec::packet::Packet {
        &self.packet
    }
}
