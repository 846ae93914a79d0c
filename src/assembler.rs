use crate::protocol::{self, FRAME_HEIGHT, FRAME_STRIDE, FRAME_WIDTH};
use crate::types::{Frame, PixelFormat};

/// What happened to one packet fed to the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    /// Packet was too short or not completed by the host controller.
    Skipped,
    /// Payload appended (or empty); no end-of-frame.
    Accumulated { dropped: usize },
    /// End-of-frame with exactly one frame's worth of bytes; callback fired.
    FrameComplete { dropped: usize },
    /// End-of-frame with a short frame; bytes discarded.
    FramePartial { dropped: usize, had: usize },
}

/// Reassembles packet payloads into a fixed-size frame buffer.
///
/// The cursor never exceeds the buffer length: payload that would overflow is
/// dropped. Every end-of-frame resets the cursor, whether or not a frame was
/// delivered.
pub struct FrameAssembler {
    buffer: Box<[u8]>,
    cursor: usize,
}

impl FrameAssembler {
    pub fn new(buffer: Box<[u8]>) -> Self {
        Self { buffer, cursor: 0 }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one captured packet. `on_frame` runs synchronously when the
    /// packet closes a complete frame.
    pub fn push_packet<F>(&mut self, data: &[u8], on_frame: F) -> PacketOutcome
    where
        F: FnOnce(&[u8]),
    {
        let packet = match protocol::parse_packet(data) {
            Some(p) => p,
            None => return PacketOutcome::Skipped,
        };

        let payload = packet.payload;
        let dropped = if self.cursor + payload.len() <= self.buffer.len() {
            self.buffer[self.cursor..self.cursor + payload.len()].copy_from_slice(payload);
            self.cursor += payload.len();
            0
        } else {
            payload.len()
        };

        if !packet.end_of_frame() {
            return PacketOutcome::Accumulated { dropped };
        }

        let had = self.cursor;
        self.cursor = 0;
        if had == self.buffer.len() {
            on_frame(&self.buffer);
            PacketOutcome::FrameComplete { dropped }
        } else {
            PacketOutcome::FramePartial { dropped, had }
        }
    }
}

/// A frame view over a complete sensor buffer.
pub fn sensor_frame(data: &[u8], timestamp_ns: u64, sequence: u32) -> Frame<'_> {
    Frame {
        width: FRAME_WIDTH,
        height: FRAME_HEIGHT,
        stride: FRAME_STRIDE as u32,
        format: PixelFormat::U16Le,
        timestamp_ns,
        sequence,
        data,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::{FRAME_BYTES, PACKET_SIZE};

    pub const HEADER_LEN: usize = 12;

    /// Build a UVC-style packet: 12-byte header, then `payload`.
    pub fn packet(payload: &[u8], eof: bool) -> Vec<u8> {
        let mut p = vec![0u8; HEADER_LEN];
        p[0] = HEADER_LEN as u8;
        p[1] = if eof { 0x8e } else { 0x8c };
        p.extend_from_slice(payload);
        p
    }

    /// Packets carrying exactly one frame of `fill`, the last one flagged EOF.
    pub fn frame_packets(fill: impl Fn(usize) -> u8) -> Vec<Vec<u8>> {
        let chunk = PACKET_SIZE - HEADER_LEN;
        let frame: Vec<u8> = (0..FRAME_BYTES).map(fill).collect();
        let mut packets: Vec<Vec<u8>> = frame.chunks(chunk).map(|c| packet(c, false)).collect();
        packets.push(packet(&[], true));
        packets
    }

    fn sensor_assembler() -> FrameAssembler {
        FrameAssembler::new(vec![0u8; FRAME_BYTES].into_boxed_slice())
    }

    #[test]
    fn test_exact_frame_fires_once() {
        let mut asm = sensor_assembler();
        let mut delivered = Vec::new();

        for p in frame_packets(|i| (i % 251) as u8) {
            asm.push_packet(&p, |data| {
                let frame = sensor_frame(data, 0, 1);
                delivered.push((frame.width, frame.height, frame.stride, frame.format, data.len()));
                assert_eq!(data[1000], (1000 % 251) as u8);
            });
        }

        assert_eq!(delivered, vec![(256, 192, 512, PixelFormat::U16Le, 98304)]);
        assert_eq!(asm.cursor(), 0);
    }

    #[test]
    fn test_payload_on_eof_packet_counts() {
        let mut asm = FrameAssembler::new(vec![0u8; 8].into_boxed_slice());
        let mut fired = 0;
        asm.push_packet(&packet(&[1, 2, 3, 4, 5], false), |_| fired += 1);
        let outcome = asm.push_packet(&packet(&[6, 7, 8], true), |data| {
            assert_eq!(data, &[1, 2, 3, 4, 5, 6, 7, 8]);
            fired += 1;
        });
        assert_eq!(outcome, PacketOutcome::FrameComplete { dropped: 0 });
        assert_eq!(fired, 1);
    }

    #[test]
    fn test_short_frame_is_dropped_and_cursor_resets() {
        let mut asm = sensor_assembler();
        let mut fired = false;
        asm.push_packet(&packet(&[0xAB; 1000], false), |_| fired = true);
        assert_eq!(asm.cursor(), 1000);

        let outcome = asm.push_packet(&packet(&[], true), |_| fired = true);
        assert_eq!(outcome, PacketOutcome::FramePartial { dropped: 0, had: 1000 });
        assert!(!fired);
        assert_eq!(asm.cursor(), 0);
    }

    #[test]
    fn test_overflow_is_dropped_and_cursor_bounded() {
        let mut asm = FrameAssembler::new(vec![0u8; 10].into_boxed_slice());
        asm.push_packet(&packet(&[1; 6], false), |_| {});
        let outcome = asm.push_packet(&packet(&[2; 6], false), |_| {});
        assert_eq!(outcome, PacketOutcome::Accumulated { dropped: 6 });
        assert_eq!(asm.cursor(), 6);

        asm.push_packet(&packet(&[3; 4], false), |_| {});
        assert_eq!(asm.cursor(), 10);
        asm.push_packet(&packet(&[4; 1], false), |_| {});
        assert!(asm.cursor() <= asm.capacity());

        let mut got = Vec::new();
        asm.push_packet(&packet(&[], true), |data| got.extend_from_slice(data));
        assert_eq!(got, vec![1, 1, 1, 1, 1, 1, 3, 3, 3, 3]);
    }

    #[test]
    fn test_malformed_packets_skipped() {
        let mut asm = sensor_assembler();
        assert_eq!(asm.push_packet(&[], |_| {}), PacketOutcome::Skipped);
        assert_eq!(asm.push_packet(&[12], |_| {}), PacketOutcome::Skipped);
        assert_eq!(asm.cursor(), 0);
    }
}
