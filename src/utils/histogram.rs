//! Per-channel histogram matching for 8-bit RGB images

use crate::error::{Result, ShowroomError};
use image::RgbImage;

/// Cumulative distribution over the intensity values that actually occur in one channel
struct ChannelCdf {
    values: Vec<f64>,
    quantiles: Vec<f64>,
}

impl ChannelCdf {
    fn from_histogram(histogram: &[u64; 256]) -> Option<Self> {
        let total: u64 = histogram.iter().sum();
        if total == 0 {
            return None;
        }
        let mut values = Vec::new();
        let mut quantiles = Vec::new();
        let mut running = 0u64;
        for (value, &count) in histogram.iter().enumerate() {
            if count == 0 {
                continue;
            }
            running += count;
            values.push(value as f64);
            quantiles.push(running as f64 / total as f64);
        }
        Some(Self { values, quantiles })
    }

    /// Intensity at quantile `q`, linearly interpolated between known points
    fn value_at(&self, q: f64) -> f64 {
        let (Some(&first_q), Some(&first_v)) = (self.quantiles.first(), self.values.first()) else {
            return 0.0;
        };
        if q <= first_q {
            return first_v;
        }
        let idx = self.quantiles.partition_point(|&probe| probe < q);
        match (
            self.quantiles.get(idx.wrapping_sub(1)),
            self.quantiles.get(idx),
            self.values.get(idx.wrapping_sub(1)),
            self.values.get(idx),
        ) {
            (Some(&q0), Some(&q1), Some(&v0), Some(&v1)) if q1 > q0 => {
                v0 + (v1 - v0) * (q - q0) / (q1 - q0)
            }
            (_, Some(_), _, Some(&v1)) => v1,
            _ => self.values.last().copied().unwrap_or(0.0),
        }
    }
}

fn channel_histogram(image: &RgbImage, channel: usize) -> [u64; 256] {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        if let Some(slot) = pixel.0.get(channel).and_then(|&v| histogram.get_mut(v as usize)) {
            *slot += 1;
        }
    }
    histogram
}

/// Build a 256-entry lookup table mapping `source` intensities onto the `reference` distribution
fn channel_lookup(source: &[u64; 256], reference: &[u64; 256]) -> Option<[u8; 256]> {
    let src = ChannelCdf::from_histogram(source)?;
    let reference = ChannelCdf::from_histogram(reference)?;
    let mut table = [0u8; 256];
    for (value, quantile) in src.values.iter().zip(&src.quantiles) {
        let mapped = reference.value_at(*quantile).round().clamp(0.0, 255.0) as u8;
        if let Some(slot) = table.get_mut(*value as usize) {
            *slot = mapped;
        }
    }
    Some(table)
}

/// Adjust `source` so each channel's intensity distribution matches `reference`
///
/// The two images may differ in size; only their distributions are compared.
pub fn match_histograms(source: &RgbImage, reference: &RgbImage) -> Result<RgbImage> {
    if source.width() == 0 || source.height() == 0 {
        return Err(ShowroomError::processing("histogram source image is empty"));
    }
    if reference.width() == 0 || reference.height() == 0 {
        return Err(ShowroomError::processing("histogram reference image is empty"));
    }

    let mut tables = [[0u8; 256]; 3];
    for (channel, table) in tables.iter_mut().enumerate() {
        *table = channel_lookup(
            &channel_histogram(source, channel),
            &channel_histogram(reference, channel),
        )
        .ok_or_else(|| ShowroomError::processing("channel histogram is empty"))?;
    }

    let mut matched = source.clone();
    for pixel in matched.pixels_mut() {
        for (value, table) in pixel.0.iter_mut().zip(&tables) {
            if let Some(&mapped) = table.get(*value as usize) {
                *value = mapped;
            }
        }
    }
    Ok(matched)
}
