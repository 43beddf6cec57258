use image::{GrayImage, Luma, RgbImage};

use crate::frames::DecodedFrame;

/// Frames scoring at or below this are treated as blurry.
pub const DEFAULT_SHARPNESS_THRESHOLD: f64 = 90.0;

/// Outcome of gating a single frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    Accept { score: f64 },
    Blurry { score: f64 },
    /// Nothing was decoded for this frame.
    Empty,
}

impl GateDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, GateDecision::Accept { .. })
    }

    pub fn score(&self) -> Option<f64> {
        match self {
            GateDecision::Accept { score } | GateDecision::Blurry { score } => Some(*score),
            GateDecision::Empty => None,
        }
    }
}

/// Accept/reject policy over the Laplacian-variance blur score.
#[derive(Debug, Clone, Copy)]
pub struct SharpnessGate {
    threshold: f64,
}

impl SharpnessGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Sharpness of an RGB frame, computed on its BT.601 luma.
    pub fn score(&self, frame: &RgbImage) -> f64 {
        laplacian_variance(&luma_bt601(frame))
    }

    pub fn evaluate(&self, frame: &DecodedFrame) -> GateDecision {
        match frame {
            DecodedFrame::Image(img) if !frame.is_empty() => {
                let score = self.score(img);
                if score > self.threshold {
                    GateDecision::Accept { score }
                } else {
                    GateDecision::Blurry { score }
                }
            }
            _ => GateDecision::Empty,
        }
    }

    pub fn accepts(&self, frame: &DecodedFrame) -> bool {
        self.evaluate(frame).is_accepted()
    }
}

impl Default for SharpnessGate {
    fn default() -> Self {
        Self::new(DEFAULT_SHARPNESS_THRESHOLD)
    }
}

// 14-bit fixed-point BT.601 weights with round-half-up, bit-exact with
// OpenCV's 8-bit RGB/BGR to gray conversion.
const LUMA_SHIFT: u32 = 14;
const LUMA_R: u32 = 4899;
const LUMA_G: u32 = 9617;
const LUMA_B: u32 = 1868;

/// Gray conversion with `Y = 0.299 R + 0.587 G + 0.114 B`.
///
/// `image`'s own `to_luma8` uses BT.709 weights, which shifts scores of
/// saturated frames enough to flip decisions near the threshold.
pub fn luma_bt601(frame: &RgbImage) -> GrayImage {
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        let [r, g, b] = frame.get_pixel(x, y).0;
        let luma = (r as u32 * LUMA_R
            + g as u32 * LUMA_G
            + b as u32 * LUMA_B
            + (1 << (LUMA_SHIFT - 1)))
            >> LUMA_SHIFT;
        Luma([luma as u8])
    })
}

/// Variance of the 3x3 Laplacian response (`[0 1 0; 1 -4 1; 0 1 0]`) over
/// every pixel, with borders reflected without repeating the edge pixel.
pub fn laplacian_variance(img: &GrayImage) -> f64 {
    let (width, height) = img.dimensions();
    if width < 2 || height < 2 {
        return 0.0;
    }

    let w = width as i64;
    let h = height as i64;
    let reflect = |i: i64, n: i64| -> u32 {
        if i < 0 {
            (-i) as u32
        } else if i >= n {
            (2 * n - i - 2) as u32
        } else {
            i as u32
        }
    };
    let at = |x: i64, y: i64| -> f64 { img.get_pixel(reflect(x, w), reflect(y, h))[0] as f64 };

    // Welford's running mean/variance; no per-pixel buffer.
    let mut count = 0f64;
    let mut mean = 0f64;
    let mut m2 = 0f64;
    for y in 0..h {
        for x in 0..w {
            let response =
                at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            count += 1.0;
            let delta = response - mean;
            mean += delta / count;
            m2 += delta * (response - mean);
        }
    }

    m2 / count
}
