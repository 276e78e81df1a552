//! Region of interest extraction

use crate::config::Region;
use image::{imageops, RgbImage};

/// Crops frames to the number display area
#[derive(Debug, Clone, Default)]
pub struct RegionExtractor {
    region: Option<Region>,
}

impl RegionExtractor {
    /// `None` keeps the full frame
    pub fn new(region: Option<Region>) -> Self {
        Self { region }
    }

    pub fn region(&self) -> Option<&Region> {
        self.region.as_ref()
    }

    /// Crop `frame` to the configured region, clamped to the frame bounds.
    /// Returns `None` when the region lies entirely outside the frame.
    pub fn extract(&self, frame: &RgbImage) -> Option<RgbImage> {
        let Some(region) = &self.region else {
            return Some(frame.clone());
        };

        let (x, y, width, height) = region.clamp_to(frame.width(), frame.height())?;
        Some(imageops::crop_imm(frame, x, y, width, height).to_image())
    }
}
