use std::{fs, path::Path};

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::{
    analysis::ela::Amplification,
    error::{ForensicsError, Result},
    pipeline::LookupVisibility,
};

pub mod analysis;
pub mod catalog;
pub mod embedding;
pub mod error;
pub mod image_utils;
pub mod pipeline;
pub mod report;
pub mod source;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub ela_quality: u8,
    pub ela_scale: u8,
    /// JPEG quality of the stored ELA image whose histogram is scored.
    pub ela_resave_quality: u8,
    pub amplification: Amplification,
    /// Images whose ELA severity is strictly above this value are flagged.
    pub tamper_threshold: u32,
    pub pre_threshold: f32,
    pub post_threshold: f32,
    pub lookup_visibility: LookupVisibility,
    pub parallel: bool,
    pub archive: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ela_quality: 90,
            ela_scale: 15,
            ela_resave_quality: 75,
            amplification: Amplification::Saturate,
            tamper_threshold: 100,
            pre_threshold: 0.5,
            post_threshold: 0.1,
            lookup_visibility: LookupVisibility::BatchSnapshot,
            parallel: true,
            archive: true,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)
            .map_err(|e| ForensicsError::InvalidParameter(format!("config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, quality) in [
            ("ela_quality", self.ela_quality),
            ("ela_resave_quality", self.ela_resave_quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(ForensicsError::InvalidParameter(format!(
                    "{name} must be within 1..=100, got {quality}"
                )));
            }
        }

        for (name, value) in [
            ("pre_threshold", self.pre_threshold),
            ("post_threshold", self.post_threshold),
        ] {
            if value.is_nan() || value < 0.0 {
                return Err(ForensicsError::InvalidParameter(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }

        Ok(())
    }
}

/// A decoded image together with the label it is archived and reported under.
#[derive(Debug, Clone)]
pub struct LabeledImage {
    pub label: String,
    pub image: DynamicImage,
}

impl LabeledImage {
    pub fn new(label: impl Into<String>, image: DynamicImage) -> Self {
        Self {
            label: label.into(),
            image,
        }
    }

    pub fn from_bytes(label: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let image = image::load_from_memory(bytes)?;
        Ok(Self::new(label, image))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub query: String,
    pub matched: String,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TamperScore {
    pub label: String,
    pub severity: u32,
}

/// Outcome of one pre/post comparison, before any threshold filtering of
/// the tamper scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairReport {
    pub direct: MatchResult,
    pub pre_tamper: TamperScore,
    pub post_tamper: TamperScore,
    pub pre_duplicates: Vec<MatchResult>,
    pub post_duplicates: Vec<MatchResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub matches: Vec<MatchResult>,
    pub pre_duplicates: Vec<MatchResult>,
    pub post_duplicates: Vec<MatchResult>,
    pub pre_flagged: Vec<TamperScore>,
    pub post_flagged: Vec<TamperScore>,
}

impl BatchReport {
    pub fn pair_count(&self) -> usize {
        self.matches.len()
    }

    pub fn flagged_count(&self) -> usize {
        self.pre_flagged.len() + self.post_flagged.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_baseline() {
        let config = PipelineConfig::default();
        assert_eq!(config.ela_quality, 90);
        assert_eq!(config.ela_scale, 15);
        assert_eq!(config.ela_resave_quality, 75);
        assert_eq!(config.tamper_threshold, 100);
        assert_eq!(config.pre_threshold, 0.5);
        assert_eq!(config.post_threshold, 0.1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_config_keeps_defaults() {
        let config =
            PipelineConfig::from_json_str(r#"{"tamper_threshold": 42, "amplification": "wrap"}"#)
                .unwrap();
        assert_eq!(config.tamper_threshold, 42);
        assert_eq!(config.amplification, Amplification::Wrap);
        assert_eq!(config.ela_quality, 90);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = PipelineConfig::from_json_str(r#"{"ela_quality": 0}"#).unwrap_err();
        assert!(matches!(err, ForensicsError::InvalidParameter(_)));

        let err = PipelineConfig::from_json_str(r#"{"ela_resave_quality": 0}"#).unwrap_err();
        assert!(matches!(err, ForensicsError::InvalidParameter(_)));

        let err = PipelineConfig::from_json_str(r#"{"pre_threshold": -1.0}"#).unwrap_err();
        assert!(matches!(err, ForensicsError::InvalidParameter(_)));
    }

    #[test]
    fn test_labeled_image_rejects_garbage_bytes() {
        let err = LabeledImage::from_bytes("broken", b"not an image").unwrap_err();
        assert!(matches!(err, ForensicsError::ImageDecode(_)));
    }
}
