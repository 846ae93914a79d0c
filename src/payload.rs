//! Fusion payload: one self-describing block bundling a raw frame, its
//! statistics, a preview thumbnail and the caller's calibration metadata.
//!
//! Layout (all little-endian, no padding between fields):
//!
//! ```text
//! offset  size  field
//! 0       22    frame info     ts_ns u64, frame_id u32, width/height/stride u16,
//!                              pixel_format u8 (0 = u16 LE), 3 pad bytes
//! 22      1038  frame stats    min/max/p10/p50/p90 u16, bad_pixels u32, hist 256 x u32
//! 1060    21    temperature    valid u8, emissivity/ambient_c/gain/offset f32, model_id u32
//! 1081    180   calibration    hash u64, K_thermal 9 x f32, K_rgb 9 x f32,
//!                              T_thermal_rgb 16 x f32, H 9 x f32
//! 1261    12    offsets        off_raw u32, off_thumb u32, total_bytes u32
//! 1273          raw frame      width * height * 2 bytes at off_raw
//!               thumbnail      w/h/pitch u16 then pitch * h bytes at off_thumb
//! ```
//!
//! Readers must locate the raw frame and thumbnail through the recorded
//! offsets rather than assuming this order.

use crate::agc::Agc;
use crate::types::{CalibrationSet, Frame, FrameStats, PixelFormat, TemperatureModel, Thumbnail};
use crate::{Result, Tc001Error};

pub const FRAME_INFO_BYTES: usize = 22;
pub const FRAME_STATS_BYTES: usize = 5 * 2 + 4 + 256 * 4;
pub const TEMPERATURE_BYTES: usize = 1 + 4 * 4 + 4;
pub const CALIBRATION_BYTES: usize = 8 + (9 + 9 + 16 + 9) * 4;
pub const OFFSETS_BYTES: usize = 3 * 4;

/// Size of the fixed header.
pub const HEADER_BYTES: usize =
    FRAME_INFO_BYTES + FRAME_STATS_BYTES + TEMPERATURE_BYTES + CALIBRATION_BYTES + OFFSETS_BYTES;

/// Size of the thumbnail's own width/height/pitch header.
pub const THUMB_HEADER_BYTES: usize = 3 * 2;

/// Pixel-format tag recorded in the frame info.
pub const PAYLOAD_FORMAT_U16_LE: u8 = 0;

/// Raw values treated as dead pixels: the sensor's sentinel extremes.
///
/// Pending confirmation against the sensor datasheet.
pub const BAD_PIXEL_VALUES: [u16; 2] = [0x0000, 0xFFFF];

/// Worst-case payload size for a frame and thumbnail of the given
/// dimensions. `pack` never writes more.
pub fn max_payload_bytes(width: usize, height: usize, thumb_width: usize, thumb_height: usize) -> usize {
    HEADER_BYTES
        .saturating_add(width.saturating_mul(height).saturating_mul(2))
        .saturating_add(THUMB_HEADER_BYTES)
        .saturating_add(thumb_width.saturating_mul(thumb_height))
}

/// Serializes fusion payloads and holds the metadata stamped into them.
pub struct PayloadPacker {
    calibration: CalibrationSet,
    temperature: TemperatureModel,
    /// Per-raw-value counts, reused across packs.
    counts: Vec<u32>,
}

impl Default for PayloadPacker {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadPacker {
    pub fn new() -> Self {
        Self {
            calibration: CalibrationSet::default(),
            temperature: TemperatureModel::default(),
            counts: Vec::new(),
        }
    }

    pub fn set_calibration(&mut self, calibration: CalibrationSet) {
        self.calibration = calibration;
    }

    pub fn set_temperature_model(&mut self, model: TemperatureModel) {
        self.temperature = model;
    }

    pub fn calibration(&self) -> &CalibrationSet {
        &self.calibration
    }

    pub fn temperature_model(&self) -> &TemperatureModel {
        &self.temperature
    }

    /// Pack `frame` into `dst` and return the number of bytes written.
    ///
    /// Fails without touching `dst` if it is smaller than
    /// [`max_payload_bytes`] for these dimensions. With `use_agc` the
    /// thumbnail is built from the AGC preview, otherwise from the high byte
    /// of each raw value.
    pub fn pack(
        &mut self,
        frame: &Frame<'_>,
        dst: &mut [u8],
        thumb_width: usize,
        thumb_height: usize,
        use_agc: bool,
    ) -> Result<usize> {
        let geometry = Geometry::of(frame)?;
        if thumb_width == 0 || thumb_height == 0 {
            return Err(Tc001Error::InvalidParam("thumbnail dimensions must be non-zero"));
        }
        let (tw, th) = match (u16::try_from(thumb_width), u16::try_from(thumb_height)) {
            (Ok(tw), Ok(th)) => (tw, th),
            _ => return Err(Tc001Error::InvalidParam("thumbnail dimensions exceed u16")),
        };

        let total = max_payload_bytes(geometry.width, geometry.height, thumb_width, thumb_height);
        if dst.len() < total {
            return Err(Tc001Error::InvalidParam("destination buffer too small"));
        }
        let total_u32 = u32::try_from(total)
            .map_err(|_| Tc001Error::InvalidParam("payload exceeds u32 offsets"))?;

        let stats = self.compute_stats(frame, &geometry);
        let agc = Agc::from_range(stats.raw_min, stats.raw_max);
        let raw_len = geometry.width * geometry.height * 2;
        let raw_offset = HEADER_BYTES;
        let thumb_offset = raw_offset + raw_len;

        let mut w = ByteWriter::new(&mut dst[..total]);

        // frame info
        w.put_u64(frame.timestamp_ns);
        w.put_u32(frame.sequence);
        w.put_u16(geometry.width as u16);
        w.put_u16(geometry.height as u16);
        w.put_u16((geometry.width * 2) as u16);
        w.put_u8(PAYLOAD_FORMAT_U16_LE);
        w.put_bytes(&[0; 3]);

        write_stats(&mut w, &stats);
        write_temperature(&mut w, &self.temperature);
        write_calibration(&mut w, &self.calibration);

        w.put_u32(raw_offset as u32);
        w.put_u32(thumb_offset as u32);
        w.put_u32(total_u32);
        debug_assert_eq!(w.pos, HEADER_BYTES);

        for row in geometry.rows(frame) {
            w.put_bytes(row);
        }

        w.put_u16(tw);
        w.put_u16(th);
        w.put_u16(tw);
        let preview = |raw: u16| if use_agc { agc.map(raw) } else { (raw >> 8) as u8 };
        box_downsample(frame, &geometry, thumb_width, thumb_height, preview, &mut w);

        debug_assert_eq!(w.pos, total);
        Ok(total)
    }

    /// Statistics for `frame`: min/max by scan, exact nearest-rank
    /// percentiles from a per-value count, bad-pixel count and the histogram
    /// of the AGC preview.
    pub fn frame_stats(&mut self, frame: &Frame<'_>) -> Result<FrameStats> {
        let geometry = Geometry::of(frame)?;
        Ok(self.compute_stats(frame, &geometry))
    }

    fn compute_stats(&mut self, frame: &Frame<'_>, geometry: &Geometry) -> FrameStats {
        self.counts.clear();
        self.counts.resize(1 << 16, 0);

        let mut stats = FrameStats {
            raw_min: u16::MAX,
            ..FrameStats::default()
        };
        for row in geometry.rows(frame) {
            for px in row.chunks_exact(2) {
                let v = u16::from_le_bytes([px[0], px[1]]);
                stats.raw_min = stats.raw_min.min(v);
                stats.raw_max = stats.raw_max.max(v);
                if BAD_PIXEL_VALUES.contains(&v) {
                    stats.bad_pixels += 1;
                }
                self.counts[v as usize] += 1;
            }
        }

        let n = (geometry.width * geometry.height) as u64;
        let ranks = [10u64, 50, 90].map(|p| ((p * n + 99) / 100).max(1));
        let mut found = [0u16; 3];
        let mut next = 0;
        let mut cumulative = 0u64;
        let agc = Agc::from_range(stats.raw_min, stats.raw_max);
        for v in stats.raw_min..=stats.raw_max {
            let count = self.counts[v as usize];
            if count == 0 {
                continue;
            }
            cumulative += count as u64;
            while next < ranks.len() && cumulative >= ranks[next] {
                found[next] = v;
                next += 1;
            }
            stats.histogram[agc.map(v) as usize] += count;
        }
        [stats.p10, stats.p50, stats.p90] = found;
        stats
    }
}

/// Validated frame geometry.
struct Geometry {
    width: usize,
    height: usize,
    stride: usize,
}

impl Geometry {
    fn of(frame: &Frame<'_>) -> Result<Self> {
        if frame.format != PixelFormat::U16Le {
            return Err(Tc001Error::InvalidParam("payload requires a 16-bit frame"));
        }
        let width = frame.width as usize;
        let height = frame.height as usize;
        let stride = frame.stride as usize;
        if width == 0 || height == 0 {
            return Err(Tc001Error::InvalidParam("frame dimensions must be non-zero"));
        }
        if width > u16::MAX as usize / 2 || height > u16::MAX as usize {
            return Err(Tc001Error::InvalidParam("frame dimensions exceed u16"));
        }
        if stride < width * 2 || frame.data.len() < stride * (height - 1) + width * 2 {
            return Err(Tc001Error::InvalidParam("frame data shorter than its geometry"));
        }
        Ok(Self {
            width,
            height,
            stride,
        })
    }

    /// Row slices of exactly `width * 2` bytes.
    fn rows<'a>(&self, frame: &Frame<'a>) -> impl Iterator<Item = &'a [u8]> {
        let row_bytes = self.width * 2;
        frame
            .data
            .chunks(self.stride)
            .take(self.height)
            .map(move |row| &row[..row_bytes])
    }

    fn raw(&self, frame: &Frame<'_>, x: usize, y: usize) -> u16 {
        let offset = y * self.stride + x * 2;
        u16::from_le_bytes([frame.data[offset], frame.data[offset + 1]])
    }
}

/// Box-filter the 8-bit preview down (or nearest-neighbour up) to
/// `tw x th`, written row-major with pitch == width.
fn box_downsample(
    frame: &Frame<'_>,
    geometry: &Geometry,
    tw: usize,
    th: usize,
    preview: impl Fn(u16) -> u8,
    w: &mut ByteWriter<'_>,
) {
    let span = |i: usize, out: usize, src: usize| {
        let start = i * src / out;
        let end = ((i + 1) * src / out).max(start + 1).min(src);
        (start, end)
    };

    for ty in 0..th {
        let (y0, y1) = span(ty, th, geometry.height);
        for tx in 0..tw {
            let (x0, x1) = span(tx, tw, geometry.width);
            let mut sum = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += preview(geometry.raw(frame, x, y)) as u32;
                }
            }
            let count = ((y1 - y0) * (x1 - x0)) as u32;
            w.put_u8(((sum + count / 2) / count) as u8);
        }
    }
}

fn write_stats(w: &mut ByteWriter<'_>, stats: &FrameStats) {
    w.put_u16(stats.raw_min);
    w.put_u16(stats.raw_max);
    w.put_u16(stats.p10);
    w.put_u16(stats.p50);
    w.put_u16(stats.p90);
    w.put_u32(stats.bad_pixels);
    for &bin in stats.histogram.iter() {
        w.put_u32(bin);
    }
}

fn write_temperature(w: &mut ByteWriter<'_>, t: &TemperatureModel) {
    w.put_u8(t.valid as u8);
    w.put_f32(t.emissivity);
    w.put_f32(t.ambient_c);
    w.put_f32(t.gain_k_per_raw);
    w.put_f32(t.offset_k);
    w.put_u32(t.model_id);
}

fn write_calibration(w: &mut ByteWriter<'_>, c: &CalibrationSet) {
    w.put_u64(c.hash);
    for &v in c
        .k_thermal
        .iter()
        .chain(c.k_rgb.iter())
        .chain(c.t_thermal_to_rgb.iter())
        .chain(c.homography.iter())
    {
        w.put_f32(v);
    }
}

struct ByteWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> ByteWriter<'a> {
    fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    fn put_u8(&mut self, v: u8) {
        self.put_bytes(&[v]);
    }

    fn put_u16(&mut self, v: u16) {
        self.put_bytes(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.put_bytes(&v.to_le_bytes());
    }

    fn put_u64(&mut self, v: u64) {
        self.put_bytes(&v.to_le_bytes());
    }

    fn put_f32(&mut self, v: f32) {
        self.put_bytes(&v.to_le_bytes());
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        self.take::<1>()[0]
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    fn f32s<const N: usize>(&mut self) -> [f32; N] {
        let mut out = [0f32; N];
        for v in out.iter_mut() {
            *v = self.f32();
        }
        out
    }
}

/// Decoded fixed header of a fusion payload.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadHeader {
    pub timestamp_ns: u64,
    pub frame_id: u32,
    pub width: u16,
    pub height: u16,
    pub stride: u16,
    pub pixel_format: u8,
    pub stats: FrameStats,
    pub temperature: TemperatureModel,
    pub calibration: CalibrationSet,
    pub raw_offset: u32,
    pub thumb_offset: u32,
    pub total_bytes: u32,
}

impl PayloadHeader {
    /// Decode the header and check that the recorded offsets fit inside
    /// both `total_bytes` and `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_BYTES {
            return Err(Tc001Error::InvalidPayload("shorter than the fixed header"));
        }
        let mut r = ByteReader { buf: bytes, pos: 0 };

        let timestamp_ns = r.u64();
        let frame_id = r.u32();
        let width = r.u16();
        let height = r.u16();
        let stride = r.u16();
        let pixel_format = r.u8();
        r.take::<3>();

        let mut stats = FrameStats {
            raw_min: r.u16(),
            raw_max: r.u16(),
            p10: r.u16(),
            p50: r.u16(),
            p90: r.u16(),
            bad_pixels: r.u32(),
            ..FrameStats::default()
        };
        for bin in stats.histogram.iter_mut() {
            *bin = r.u32();
        }

        let temperature = TemperatureModel {
            valid: r.u8() != 0,
            emissivity: r.f32(),
            ambient_c: r.f32(),
            gain_k_per_raw: r.f32(),
            offset_k: r.f32(),
            model_id: r.u32(),
        };

        let calibration = CalibrationSet {
            hash: r.u64(),
            k_thermal: r.f32s(),
            k_rgb: r.f32s(),
            t_thermal_to_rgb: r.f32s(),
            homography: r.f32s(),
        };

        let header = PayloadHeader {
            timestamp_ns,
            frame_id,
            width,
            height,
            stride,
            pixel_format,
            stats,
            temperature,
            calibration,
            raw_offset: r.u32(),
            thumb_offset: r.u32(),
            total_bytes: r.u32(),
        };
        header.validate(bytes.len())?;
        Ok(header)
    }

    fn validate(&self, available: usize) -> Result<()> {
        let total = self.total_bytes as usize;
        if total > available {
            return Err(Tc001Error::InvalidPayload("total_bytes exceeds buffer"));
        }
        let raw_end = (self.raw_offset as usize).checked_add(self.raw_len());
        if (self.raw_offset as usize) < HEADER_BYTES || raw_end.map_or(true, |end| end > total) {
            return Err(Tc001Error::InvalidPayload("raw frame offset out of range"));
        }
        let thumb = self.thumb_offset as usize;
        if thumb < HEADER_BYTES || thumb + THUMB_HEADER_BYTES > total {
            return Err(Tc001Error::InvalidPayload("thumbnail offset out of range"));
        }
        Ok(())
    }

    fn raw_len(&self) -> usize {
        self.width as usize * self.height as usize * 2
    }

    /// The raw 16-bit frame, located by its recorded offset.
    pub fn raw_frame<'a>(&self, bytes: &'a [u8]) -> Result<&'a [u8]> {
        self.validate(bytes.len())?;
        let start = self.raw_offset as usize;
        Ok(&bytes[start..start + self.raw_len()])
    }

    /// The thumbnail geometry and its `pitch * height` pixel bytes.
    pub fn thumbnail<'a>(&self, bytes: &'a [u8]) -> Result<(Thumbnail, &'a [u8])> {
        self.validate(bytes.len())?;
        let mut r = ByteReader {
            buf: bytes,
            pos: self.thumb_offset as usize,
        };
        let thumb = Thumbnail {
            width: r.u16(),
            height: r.u16(),
            pitch: r.u16(),
        };
        if thumb.pitch < thumb.width {
            return Err(Tc001Error::InvalidPayload("thumbnail pitch below width"));
        }
        let start = r.pos;
        let end = start + thumb.pitch as usize * thumb.height as usize;
        if end > self.total_bytes as usize {
            return Err(Tc001Error::InvalidPayload("thumbnail runs past total_bytes"));
        }
        Ok((thumb, &bytes[start..end]))
    }
}
