// -- USB identifiers --
pub const VID: u16 = 0x0BDA;
pub const PID: u16 = 0x5830;
pub const STREAM_INTERFACE: u8 = 1;
pub const STREAM_ALT_SETTING: u8 = 7;
pub const ISO_ENDPOINT: u8 = 0x81;

// -- Isochronous geometry --
pub const PACKET_SIZE: usize = 3072;
pub const NUM_PACKETS: usize = 64;
pub const ISO_BUFFER_BYTES: usize = PACKET_SIZE * NUM_PACKETS;

/// Timeout attached to each isochronous transfer, in milliseconds.
pub const ISO_TIMEOUT_MS: u32 = 1000;

// -- Frame geometry --
pub const FRAME_WIDTH: u32 = 256;
pub const FRAME_HEIGHT: u32 = 192;
pub const BYTES_PER_PIXEL: usize = 2;
pub const FRAME_STRIDE: usize = FRAME_WIDTH as usize * BYTES_PER_PIXEL;
pub const FRAME_BYTES: usize = FRAME_STRIDE * FRAME_HEIGHT as usize;

/// Smallest packet that still carries a header length and flag byte.
pub const MIN_PACKET_LEN: usize = 2;

bitflags::bitflags! {
    /// Flag byte carried at offset 1 of every isochronous packet.
    ///
    /// The module speaks UVC payload headers; only END_OF_FRAME drives
    /// reassembly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketFlags: u8 {
        const FRAME_ID     = 1 << 0;
        const END_OF_FRAME = 1 << 1;
        const PTS          = 1 << 2;
        const SCR          = 1 << 3;
        const STILL        = 1 << 5;
        const ERROR        = 1 << 6;
        const END_OF_HEADER = 1 << 7;
    }
}

/// A packet split into its header flags and frame payload.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    pub flags: PacketFlags,
    pub payload: &'a [u8],
}

impl Packet<'_> {
    pub fn end_of_frame(&self) -> bool {
        self.flags.contains(PacketFlags::END_OF_FRAME)
    }
}

/// Split a captured packet into flags and payload.
///
/// Returns `None` for packets shorter than [`MIN_PACKET_LEN`]. A header length
/// running past the captured bytes yields an empty payload.
pub fn parse_packet(data: &[u8]) -> Option<Packet<'_>> {
    if data.len() < MIN_PACKET_LEN {
        return None;
    }
    let header_len = data[0] as usize;
    let flags = PacketFlags::from_bits_retain(data[1]);
    let payload = data.get(header_len..).unwrap_or(&[]);
    Some(Packet { flags, payload })
}

/// One blocking OUT control transfer of the start-up handshake.
#[derive(Debug, Clone, Copy)]
pub struct ControlRequest {
    pub label: &'static str,
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub data: &'static [u8],
}

// bmRequestType values (all host-to-device)
pub const REQ_STANDARD_DEVICE_OUT: u8 = 0x00;
pub const REQ_VENDOR_INTERFACE_OUT: u8 = 0x41;
pub const REQ_CLASS_INTERFACE_OUT: u8 = 0x21;

pub const SET_CONFIGURATION: u8 = 0x09;
pub const VENDOR_MODE_SELECT: u8 = 0x45;
pub const UVC_SET_CUR: u8 = 0x01;
pub const VS_PROBE_CONTROL: u16 = 0x0100;
pub const VS_COMMIT_CONTROL: u16 = 0x0200;

const SET_CONFIGURATION_PAYLOAD: [u8; 36] = [
    0x1c, 0x00, 0x90, 0x05, 0x9a, 0xab, 0x83, 0xe2, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x0d, 0x00, 0x00, 0x02, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x09,
    0x01, 0x00, 0x00, 0x00, 0x00, 0x00,
];

const VENDOR_SETUP_PAYLOAD: [u8; 8] = [0x05, 0x84, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08];

const PROBE_PAYLOAD: [u8; 25] = [
    0x01, 0x00, 0x01, 0x02, 0x80, 0x1a, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x20, 0x00, 0x00, 0x80, 0x01, 0x00, 0x00, 0x0c, 0x00, 0x00,
];

// Same as probe except the max payload transfer size (bytes 18..22).
const COMMIT_PAYLOAD: [u8; 25] = [
    0x01, 0x00, 0x01, 0x02, 0x80, 0x1a, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x20, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x0c, 0x00, 0x00,
];

/// The start-up sequence, in order. Firmware contract: byte-exact.
pub const HANDSHAKE: [ControlRequest; 4] = [
    ControlRequest {
        label: "SET_CONFIGURATION",
        request_type: REQ_STANDARD_DEVICE_OUT,
        request: SET_CONFIGURATION,
        value: 0x0001,
        index: 0x0000,
        data: &SET_CONFIGURATION_PAYLOAD,
    },
    ControlRequest {
        label: "vendor setup",
        request_type: REQ_VENDOR_INTERFACE_OUT,
        request: VENDOR_MODE_SELECT,
        value: 0x0078,
        index: 0x1d00,
        data: &VENDOR_SETUP_PAYLOAD,
    },
    ControlRequest {
        label: "probe",
        request_type: REQ_CLASS_INTERFACE_OUT,
        request: UVC_SET_CUR,
        value: VS_PROBE_CONTROL,
        index: STREAM_INTERFACE as u16,
        data: &PROBE_PAYLOAD,
    },
    ControlRequest {
        label: "commit",
        request_type: REQ_CLASS_INTERFACE_OUT,
        request: UVC_SET_CUR,
        value: VS_COMMIT_CONTROL,
        index: STREAM_INTERFACE as u16,
        data: &COMMIT_PAYLOAD,
    },
];
