use std::{io::Cursor, path::Path};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::{
    error::{ForensicsError, Result},
    image_utils::{calculate_histogram, count_nonzero_buckets},
};

/// How an amplified difference that no longer fits in a byte is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Amplification {
    #[default]
    Saturate,
    Wrap,
}

impl Amplification {
    pub fn apply(self, diff: u8, scale: u8) -> u8 {
        match self {
            Amplification::Saturate => diff.saturating_mul(scale),
            Amplification::Wrap => diff.wrapping_mul(scale),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ElaReport {
    pub image: RgbImage,
    pub histogram: [u32; 256],
    pub severity: u32,
    pub max_difference: f64,
    pub mean_difference: f64,
    pub std_deviation: f64,
}

impl ElaReport {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.image.save(path)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct TamperDetector {
    quality: u8,
    resave_quality: u8,
    scale: u8,
    amplification: Amplification,
}

impl TamperDetector {
    pub fn new(quality: u8) -> Self {
        Self {
            quality,
            resave_quality: 75,
            scale: 15,
            amplification: Amplification::Saturate,
        }
    }

    pub fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    pub fn with_amplification(mut self, amplification: Amplification) -> Self {
        self.amplification = amplification;
        self
    }

    /// JPEG quality the amplified difference image is stored at before its
    /// histogram is taken.
    pub fn with_resave_quality(mut self, quality: u8) -> Self {
        self.resave_quality = quality;
        self
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn resave_quality(&self) -> u8 {
        self.resave_quality
    }

    /// Number of distinct intensities in the stored ELA image.
    pub fn detect(&self, image: &DynamicImage) -> Result<u32> {
        let ela_image = self.ela_image(image)?;
        Ok(count_nonzero_buckets(&calculate_histogram(&ela_image)))
    }

    pub fn analyze(&self, image: &DynamicImage) -> Result<ElaReport> {
        let ela_image = self.ela_image(image)?;

        let histogram = calculate_histogram(&ela_image);
        let severity = count_nonzero_buckets(&histogram);

        let values = ela_image.iter().map(|&v| v as f64).collect::<Vec<_>>();
        let max_difference = values.iter().cloned().fold(0.0f64, f64::max);
        let mean_difference = Statistics::mean(values.iter());
        let std_deviation = Statistics::population_std_dev(values.iter());

        Ok(ElaReport {
            image: ela_image,
            histogram,
            severity,
            max_difference,
            mean_difference,
            std_deviation,
        })
    }

    /// Amplified difference against the recompressed copy, round-tripped
    /// through JPEG at `resave_quality`.
    fn ela_image(&self, image: &DynamicImage) -> Result<RgbImage> {
        let original = image.to_rgb8();
        let recompressed = recompress_jpeg(&original, self.quality)?;

        let mut difference = RgbImage::new(original.width(), original.height());
        for (x, y, orig) in original.enumerate_pixels() {
            let recomp = recompressed.get_pixel(x, y);
            let mut amplified = [0u8; 3];
            for c in 0..3 {
                amplified[c] = self
                    .amplification
                    .apply(orig[c].abs_diff(recomp[c]), self.scale);
            }
            difference.put_pixel(x, y, Rgb(amplified));
        }

        recompress_jpeg(&difference, self.resave_quality)
    }
}

fn recompress_jpeg(image: &RgbImage, quality: u8) -> Result<RgbImage> {
    if !(1..=100).contains(&quality) {
        return Err(ForensicsError::InvalidParameter(format!(
            "JPEG quality must be within 1..=100, got {quality}"
        )));
    }

    let mut buffer = Cursor::new(Vec::new());

    let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    image
        .write_with_encoder(encoder)
        .map_err(|e| ForensicsError::Encoding(e.to_string()))?;

    let recompressed = image::load_from_memory_with_format(buffer.get_ref(), ImageFormat::Jpeg)
        .map_err(|e| ForensicsError::Encoding(e.to_string()))?
        .to_rgb8();

    if recompressed.dimensions() != image.dimensions() {
        return Err(ForensicsError::Encoding(format!(
            "recompressed image is {}x{}, expected {}x{}",
            recompressed.width(),
            recompressed.height(),
            image.width(),
            image.height()
        )));
    }

    Ok(recompressed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 37 + y * 91) ^ (x * y)) % 256;
            Rgb([v as u8, (v * 3 % 256) as u8, (255 - v) as u8])
        }))
    }

    fn noise(width: u32, height: u32, seed: u32) -> DynamicImage {
        let mut state = seed;
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, _| {
            let mut channel = || {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            };
            Rgb([channel(), channel(), channel()])
        }))
    }

    #[test]
    fn test_detector_creation() {
        let detector = TamperDetector::new(90);
        assert_eq!(detector.quality(), 90);
        assert_eq!(detector.scale, 15);
        assert_eq!(detector.amplification, Amplification::Saturate);
        assert_eq!(detector.resave_quality(), 75);
    }

    #[test]
    fn test_amplification_policies() {
        assert_eq!(Amplification::Saturate.apply(20, 15), 255);
        assert_eq!(Amplification::Wrap.apply(20, 15), 44);
        assert_eq!(Amplification::Saturate.apply(3, 15), 45);
        assert_eq!(Amplification::Wrap.apply(3, 15), 45);
    }

    #[test]
    fn test_severity_is_reproducible() {
        let image = textured(64, 48);
        let detector = TamperDetector::new(90);

        let first = detector.detect(&image).unwrap();
        let second = detector.detect(&image).unwrap();
        assert_eq!(first, second);
        assert!(first >= 1 && first <= 256);
    }

    #[test]
    fn test_flat_image_scores_below_textured() {
        let flat = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 64, Rgb([128, 128, 128])));
        let detector = TamperDetector::new(90);

        let flat_severity = detector.detect(&flat).unwrap();
        let textured_severity = detector.detect(&textured(64, 64)).unwrap();
        assert!(flat_severity < textured_severity);
    }

    #[test]
    fn test_report_statistics_are_consistent() {
        let report = TamperDetector::new(90).analyze(&textured(32, 32)).unwrap();

        assert_eq!(report.image.dimensions(), (32, 32));
        assert_eq!(report.histogram.iter().sum::<u32>(), 32 * 32 * 3);
        assert_eq!(report.severity, count_nonzero_buckets(&report.histogram));
        assert!(report.mean_difference <= report.max_difference);
        assert!(report.std_deviation >= 0.0);
    }

    #[test]
    fn test_invalid_quality_fails_without_result() {
        let err = TamperDetector::new(0).detect(&textured(8, 8)).unwrap_err();
        assert!(matches!(err, ForensicsError::InvalidParameter(_)));
    }

    #[test]
    fn test_noisy_image_exceeds_default_threshold() {
        let severity = TamperDetector::new(90).detect(&noise(256, 256, 7)).unwrap();
        assert!(severity > 100, "severity {severity}");
    }

    #[test]
    fn test_detect_matches_report_severity() {
        let detector = TamperDetector::new(90);
        let image = noise(64, 64, 3);
        assert_eq!(
            detector.detect(&image).unwrap(),
            detector.analyze(&image).unwrap().severity
        );
    }

    #[test]
    fn test_invalid_resave_quality_is_rejected() {
        let err = TamperDetector::new(90)
            .with_resave_quality(101)
            .detect(&textured(8, 8))
            .unwrap_err();
        assert!(matches!(err, ForensicsError::InvalidParameter(_)));
    }
}
