//! Color classification of the number display
//!
//! Last-resort strategy: reports only a color, never a number.

use super::detector::{CandidateRecognizer, Recognition, RecognitionMethod, RecognitionResult, RouletteColor};
use crate::config::{ColorConfig, HsvRange};
use image::RgbImage;

/// Fixed confidence of a color-only result
pub const COLOR_CONFIDENCE: f32 = 0.5;

/// Convert RGB to HSV on the OpenCV 8-bit scale (H 0-179, S/V 0-255)
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let r = rgb[0] as f32 / 255.0;
    let g = rgb[1] as f32 / 255.0;
    let b = rgb[2] as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue_degrees = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let saturation = if max <= f32::EPSILON { 0.0 } else { delta / max };

    let h = (hue_degrees / 2.0).round().clamp(0.0, 179.0) as u8;
    let s = (saturation * 255.0).round() as u8;
    let v = (max * 255.0).round() as u8;
    [h, s, v]
}

/// HSV of the image's mean color; `None` for an empty image.
///
/// This is not the per-pixel HSV average. Pixels are averaged in RGB and the
/// mean is converted once, because averaging hue directly turns red pixels
/// straddling 0/179 into a green-ish hue near 90.
pub fn mean_hsv(image: &RgbImage) -> Option<[u8; 3]> {
    let count = image.width() as u64 * image.height() as u64;
    if count == 0 {
        return None;
    }

    let mut sums = [0u64; 3];
    for pixel in image.pixels() {
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += channel as u64;
        }
    }
    let mean = sums.map(|sum| (sum / count) as u8);
    Some(rgb_to_hsv(mean))
}

/// Classifies the region's dominant color against configured HSV ranges
pub struct ColorClassifier {
    ranges: Vec<(RouletteColor, Vec<HsvRange>)>,
}

impl ColorClassifier {
    pub fn new(config: &ColorConfig) -> Self {
        Self {
            ranges: vec![
                (RouletteColor::Red, config.red.clone()),
                (RouletteColor::Black, config.black.clone()),
                (RouletteColor::Green, config.green.clone()),
            ],
        }
    }

    /// Color whose ranges contain `hsv`, checked in red, black, green order
    pub fn classify_hsv(&self, hsv: [u8; 3]) -> Option<RouletteColor> {
        self.ranges
            .iter()
            .find(|(_, ranges)| ranges.iter().any(|range| range.contains(hsv)))
            .map(|(color, _)| *color)
    }
}

impl Default for ColorClassifier {
    fn default() -> Self {
        Self::new(&ColorConfig::default())
    }
}

impl CandidateRecognizer for ColorClassifier {
    fn method(&self) -> RecognitionMethod {
        RecognitionMethod::Color
    }

    fn recognize(&self, roi: &RgbImage) -> Recognition {
        let Some(hsv) = mean_hsv(roi) else {
            return Recognition::NoMatch;
        };

        match self.classify_hsv(hsv) {
            Some(color) => {
                log::trace!("Color fallback: {} (hsv {:?})", color, hsv);
                Recognition::Accepted(RecognitionResult::color_only(color, COLOR_CONFIDENCE))
            }
            None => Recognition::NoMatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_rgb_to_hsv() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
        assert_eq!(rgb_to_hsv([255, 255, 255]), [0, 0, 255]);
    }

    #[test]
    fn test_classify_solid_colors() {
        let classifier = ColorClassifier::default();
        let classify = |rgb: [u8; 3]| {
            match classifier.recognize(&RgbImage::from_pixel(8, 8, Rgb(rgb))) {
                Recognition::Accepted(result) => {
                    assert_eq!(result.number, None);
                    assert_eq!(result.confidence, COLOR_CONFIDENCE);
                    result.color
                }
                _ => None,
            }
        };

        assert_eq!(classify([200, 20, 30]), Some(RouletteColor::Red));
        assert_eq!(classify([180, 10, 60]), Some(RouletteColor::Red));
        assert_eq!(classify([15, 15, 15]), Some(RouletteColor::Black));
        assert_eq!(classify([20, 150, 40]), Some(RouletteColor::Green));
        assert_eq!(classify([200, 200, 200]), None);
    }

    #[test]
    fn test_empty_roi() {
        let classifier = ColorClassifier::default();
        assert_eq!(classifier.recognize(&RgbImage::new(0, 0)), Recognition::NoMatch);
    }
}
