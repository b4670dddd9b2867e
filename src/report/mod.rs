use serde::Serialize;

use crate::{BatchReport, MatchResult, PipelineConfig, TamperScore};

#[derive(Serialize)]
pub struct JsonReport {
    pub pair_count: usize,
    pub matches: Vec<MatchResult>,
    pub pre_duplicates: DuplicateSection,
    pub post_duplicates: DuplicateSection,
    pub tampering: TamperSection,
}

#[derive(Serialize)]
pub struct DuplicateSection {
    pub threshold: f32,
    pub match_count: usize,
    pub matches: Vec<MatchResult>,
}

#[derive(Serialize)]
pub struct TamperSection {
    pub ela_quality: u8,
    pub threshold: u32,
    pub pre_flagged: Vec<TamperScore>,
    pub post_flagged: Vec<TamperScore>,
}

impl JsonReport {
    pub fn new(report: &BatchReport, config: &PipelineConfig) -> Self {
        Self {
            pair_count: report.pair_count(),
            matches: report.matches.clone(),
            pre_duplicates: DuplicateSection {
                threshold: config.pre_threshold,
                match_count: report.pre_duplicates.len(),
                matches: report.pre_duplicates.clone(),
            },
            post_duplicates: DuplicateSection {
                threshold: config.post_threshold,
                match_count: report.post_duplicates.len(),
                matches: report.post_duplicates.clone(),
            },
            tampering: TamperSection {
                ela_quality: config.ela_quality,
                threshold: config.tamper_threshold,
                pre_flagged: report.pre_flagged.clone(),
                post_flagged: report.post_flagged.clone(),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
