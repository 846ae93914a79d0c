//! Automatic gain control: stretch the raw 16-bit range onto 0..=255.

/// A min/max stretch fitted to one buffer of raw values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Agc {
    min: u16,
    span: f32,
}

impl Agc {
    /// Fit the mapping in a single pass. The span is clamped to at least 1,
    /// so uniform input maps everything to 0.
    pub fn fit<I: IntoIterator<Item = u16>>(values: I) -> Self {
        let (lo, hi) = values
            .into_iter()
            .fold((u16::MAX, u16::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
        if lo > hi {
            // empty input
            return Self { min: 0, span: 1.0 };
        }
        Self::from_range(lo, hi)
    }

    pub fn from_range(min: u16, max: u16) -> Self {
        let span = (max.saturating_sub(min) as f32).max(1.0);
        Self { min, span }
    }

    #[inline]
    pub fn map(&self, value: u16) -> u8 {
        let v = value.saturating_sub(self.min) as f32 / self.span;
        (v * 255.0 + 0.5).clamp(0.0, 255.0) as u8
    }
}

/// Normalize `raw` into `out`. Only the common prefix of both slices is
/// written.
pub fn normalize(raw: &[u16], out: &mut [u8]) {
    let agc = Agc::fit(raw.iter().copied());
    for (dst, &src) in out.iter_mut().zip(raw) {
        *dst = agc.map(src);
    }
}

pub fn normalize_to_vec(raw: &[u16]) -> Vec<u8> {
    let mut out = vec![0u8; raw.len()];
    normalize(raw, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_range_endpoints() {
        let out = normalize_to_vec(&[1000, 1500, 2000]);
        assert_eq!(out, vec![0, 128, 255]);
    }

    #[test]
    fn test_uniform_input_is_constant() {
        let out = normalize_to_vec(&[4242; 64]);
        assert!(out.iter().all(|&v| v == out[0]));
        assert_eq!(out[0], 0);
    }

    #[test]
    fn test_monotonic() {
        let raw: Vec<u16> = (0..2000u32).map(|i| ((i * 7919) % 65536) as u16).collect();
        let agc = Agc::fit(raw.iter().copied());
        let mut sorted = raw.clone();
        sorted.sort_unstable();
        for pair in sorted.windows(2) {
            assert!(agc.map(pair[0]) <= agc.map(pair[1]));
        }
    }

    #[test]
    fn test_span_of_one() {
        let out = normalize_to_vec(&[7, 8, 7]);
        assert_eq!(out, vec![0, 255, 0]);
    }

    #[test]
    fn test_empty_and_short_output() {
        assert!(normalize_to_vec(&[]).is_empty());

        let mut out = [9u8; 2];
        normalize(&[0, 100, 200], &mut out);
        assert_eq!(out, [0, 128]);
    }
}
