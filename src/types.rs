/// Pixel layout of a delivered frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// One byte per pixel.
    U8 = 0,
    /// Two bytes per pixel, little-endian raw sensor counts.
    U16Le = 1,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::U8 => 1,
            PixelFormat::U16Le => 2,
        }
    }
}

/// A reassembled frame, borrowed from the session for the duration of the
/// frame callback. Copy `data` out if it must outlive the call.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub width: u32,
    pub height: u32,
    /// Bytes per row.
    pub stride: u32,
    pub format: PixelFormat,
    /// Host monotonic nanoseconds since the session was opened; 0 if unknown.
    pub timestamp_ns: u64,
    /// Delivery counter, starting at 1 for the first frame of a session.
    pub sequence: u32,
    pub data: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Raw sensor values in row-major order. Only meaningful for `U16Le`.
    pub fn raw_values(&self) -> impl Iterator<Item = u16> + 'a {
        self.data
            .chunks_exact(2)
            .map(|px| u16::from_le_bytes([px[0], px[1]]))
    }

    /// Raw value at (x, y), or `None` if out of bounds.
    pub fn raw_at(&self, x: u32, y: u32) -> Option<u16> {
        if x >= self.width || y >= self.height || self.format != PixelFormat::U16Le {
            return None;
        }
        let offset = y as usize * self.stride as usize + x as usize * 2;
        let px = self.data.get(offset..offset + 2)?;
        Some(u16::from_le_bytes([px[0], px[1]]))
    }
}

/// Camera intrinsics and thermal→RGB alignment supplied by the caller.
///
/// All matrices are row-major.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationSet {
    /// Caller-computed hash used downstream for change detection.
    pub hash: u64,
    pub k_thermal: [f32; 9],
    pub k_rgb: [f32; 9],
    pub t_thermal_to_rgb: [f32; 16],
    /// Optional homography; all zero when unused.
    pub homography: [f32; 9],
}

const IDENTITY3: [f32; 9] = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
const IDENTITY4: [f32; 16] = [
    1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0,
];

impl Default for CalibrationSet {
    fn default() -> Self {
        Self {
            hash: 0,
            k_thermal: IDENTITY3,
            k_rgb: IDENTITY3,
            t_thermal_to_rgb: IDENTITY4,
            homography: [0.0; 9],
        }
    }
}

/// Linear raw-count to Kelvin model: `K = gain_k_per_raw * raw + offset_k`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TemperatureModel {
    pub valid: bool,
    pub emissivity: f32,
    pub ambient_c: f32,
    pub gain_k_per_raw: f32,
    pub offset_k: f32,
    /// Identifies the LUT or model the parameters came from.
    pub model_id: u32,
}

/// Per-frame statistics carried in the fusion payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStats {
    pub raw_min: u16,
    pub raw_max: u16,
    pub p10: u16,
    pub p50: u16,
    pub p90: u16,
    pub bad_pixels: u32,
    /// Histogram of the 8-bit AGC preview.
    pub histogram: [u32; 256],
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            raw_min: 0,
            raw_max: 0,
            p10: 0,
            p50: 0,
            p90: 0,
            bad_pixels: 0,
            histogram: [0; 256],
        }
    }
}

/// Geometry of a downsampled 8-bit preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thumbnail {
    pub width: u16,
    pub height: u16,
    /// Bytes per row, always >= width.
    pub pitch: u16,
}

/// A matching device found on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_number: u8,
    pub address: u8,
}
