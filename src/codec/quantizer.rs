//! Fixed-point scalar and vector quantizers.

use crate::util::{IVec2, IVec3, Vec2, Vec3};

/// Uniform scalar quantizer with a fixed bin size.
///
/// Magnitudes round half up and the sign is reapplied afterwards, so the
/// reconstruction error is symmetric around zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quantizer {
    bin_size: f32,
    half_bin: f32,
    one_over_bin: f32,
}

impl Quantizer {
    /// Quantizer whose bin size equals `precision`.
    pub fn new(precision: f32) -> Self {
        assert!(precision > 0.0 && precision.is_finite(), "invalid quantizer precision {precision}");
        Self {
            bin_size: precision,
            half_bin: precision * 0.5,
            one_over_bin: 1.0 / precision,
        }
    }

    /// Quantizer splitting `range` into `2^bits` bins.
    pub fn with_range(range: f32, bits: u32) -> Self {
        assert!(bits < 32, "quantizer bit count {bits} out of range");
        Self::new(range / (1u64 << bits) as f32)
    }

    /// Size of one quantization step.
    #[inline]
    pub fn bin_size(&self) -> f32 {
        self.bin_size
    }

    #[inline]
    pub fn quantize(&self, value: f32) -> i32 {
        let sign = if value >= 0.0 { 1 } else { -1 };
        sign * ((value.abs() + self.half_bin) * self.one_over_bin) as i32
    }

    #[inline]
    pub fn dequantize(&self, value: i32) -> f32 {
        value as f32 * self.bin_size
    }
}

/// One scalar quantizer per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec2Quantizer {
    pub x: Quantizer,
    pub y: Quantizer,
}

impl Vec2Quantizer {
    pub fn new(precision: f32) -> Self {
        let q = Quantizer::new(precision);
        Self { x: q, y: q }
    }

    pub fn with_range(range: Vec2, bits: u32) -> Self {
        Self {
            x: Quantizer::with_range(range.x, bits),
            y: Quantizer::with_range(range.y, bits),
        }
    }

    #[inline]
    pub fn quantize(&self, v: Vec2) -> IVec2 {
        IVec2::new(self.x.quantize(v.x), self.y.quantize(v.y))
    }

    #[inline]
    pub fn dequantize(&self, v: IVec2) -> Vec2 {
        Vec2::new(self.x.dequantize(v.x), self.y.dequantize(v.y))
    }
}

/// One scalar quantizer per axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vec3Quantizer {
    pub x: Quantizer,
    pub y: Quantizer,
    pub z: Quantizer,
}

impl Vec3Quantizer {
    pub fn new(precision: f32) -> Self {
        let q = Quantizer::new(precision);
        Self { x: q, y: q, z: q }
    }

    pub fn with_range(range: Vec3, bits: u32) -> Self {
        Self {
            x: Quantizer::with_range(range.x, bits),
            y: Quantizer::with_range(range.y, bits),
            z: Quantizer::with_range(range.z, bits),
        }
    }

    #[inline]
    pub fn quantize(&self, v: Vec3) -> IVec3 {
        IVec3::new(self.x.quantize(v.x), self.y.quantize(v.y), self.z.quantize(v.z))
    }

    #[inline]
    pub fn dequantize(&self, v: IVec3) -> Vec3 {
        Vec3::new(
            self.x.dequantize(v.x),
            self.y.dequantize(v.y),
            self.z.dequantize(v.z),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision_scenario() {
        let q = Quantizer::new(0.01);
        let v = q.dequantize(q.quantize(1.234));
        assert!((v - 1.234).abs() <= 0.01, "got {v}");
    }

    #[test]
    fn test_symmetric_rounding() {
        let q = Quantizer::new(1.0);
        assert_eq!(q.quantize(0.0), 0);
        assert_eq!(q.quantize(0.49), 0);
        assert_eq!(q.quantize(-0.49), 0);
        assert_eq!(q.quantize(0.5), 1);
        assert_eq!(q.quantize(1.49), 1);
        assert_eq!(q.quantize(-0.5), -1);
        assert_eq!(q.quantize(-1.5), -2);
    }

    #[test]
    fn test_range_constructor() {
        let q = Quantizer::with_range(1.0, 10);
        assert_eq!(q.bin_size(), 1.0 / 1024.0);
        assert_eq!(q.quantize(1.0), 1024);
        assert_eq!(q.dequantize(512), 0.5);
    }

    #[test]
    fn test_error_within_half_bin() {
        let q = Quantizer::new(0.001);
        for i in -500..500 {
            let v = i as f32 * 0.01237;
            let r = q.dequantize(q.quantize(v));
            assert!((r - v).abs() <= 0.0005 + 1e-5, "{v} -> {r}");
        }
    }

    #[test]
    fn test_vector_quantizers() {
        let q3 = Vec3Quantizer::new(0.5);
        assert_eq!(q3.quantize(Vec3::new(1.0, -1.0, 0.2)), IVec3::new(2, -2, 0));
        assert_eq!(q3.dequantize(IVec3::new(2, -2, 0)), Vec3::new(1.0, -1.0, 0.0));

        let q2 = Vec2Quantizer::with_range(Vec2::ONE, 2);
        assert_eq!(q2.quantize(Vec2::new(0.25, 0.75)), IVec2::new(1, 3));
    }
}
