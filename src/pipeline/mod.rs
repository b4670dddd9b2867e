pub mod pairing;

use std::sync::Arc;

use log::{debug, info, warn};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::{Deserialize, Serialize};

use crate::{
    BatchReport, LabeledImage, MatchResult, PairReport, PipelineConfig, TamperScore,
    analysis::ela::TamperDetector,
    catalog::{CatalogSnapshot, EmbeddingCatalog, Neighbor},
    embedding::{Embedding, SiameseModels},
    error::Result,
    pipeline::pairing::{ImagePair, PairingStrategy, align},
};

/// Which catalog contents a lookup inside a batch can see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupVisibility {
    /// Every lookup sees the catalogs as they were when the batch started.
    #[default]
    BatchSnapshot,
    /// Lookups also see entries archived by earlier pairs of the same batch.
    LiveAppend,
}

struct PairAnalysis {
    pre_tamper: TamperScore,
    post_tamper: TamperScore,
    pre_query: Embedding,
    pre_archive: Embedding,
    post_query: Embedding,
    post_archive: Embedding,
    direct: MatchResult,
}

pub struct MatchingOrchestrator {
    models: Arc<SiameseModels>,
    detector: TamperDetector,
    pre_catalog: Arc<EmbeddingCatalog>,
    post_catalog: Arc<EmbeddingCatalog>,
    config: PipelineConfig,
}

impl MatchingOrchestrator {
    pub fn new(
        models: Arc<SiameseModels>,
        pre_catalog: Arc<EmbeddingCatalog>,
        post_catalog: Arc<EmbeddingCatalog>,
    ) -> Self {
        let config = PipelineConfig::default();
        Self {
            models,
            detector: detector_for(&config),
            pre_catalog,
            post_catalog,
            config,
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.detector = detector_for(&config);
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn pre_catalog(&self) -> &EmbeddingCatalog {
        &self.pre_catalog
    }

    pub fn post_catalog(&self) -> &EmbeddingCatalog {
        &self.post_catalog
    }

    /// Compares `pre[i]` with `post[i]` for every position.
    pub fn run(&self, pre: Vec<LabeledImage>, post: Vec<LabeledImage>) -> Result<BatchReport> {
        self.run_pairs(&align(pre, post)?)
    }

    pub fn run_with(
        &self,
        pre: Vec<LabeledImage>,
        post: Vec<LabeledImage>,
        strategy: &dyn PairingStrategy,
    ) -> Result<BatchReport> {
        let pairs = strategy.pair(pre, post)?;
        debug!("Paired {} images using {} pairing", pairs.len(), strategy.name());
        self.run_pairs(&pairs)
    }

    /// Processes a whole batch. Every image is analysed and every entry checked
    /// against its catalog before the catalogs are touched, so a decode,
    /// inference or label failure leaves them unchanged.
    pub fn run_pairs(&self, pairs: &[ImagePair]) -> Result<BatchReport> {
        self.config.validate()?;

        let analyses = if self.config.parallel {
            pairs
                .par_iter()
                .map(|pair| self.analyze(pair))
                .collect::<Result<Vec<_>>>()?
        } else {
            pairs
                .iter()
                .map(|pair| self.analyze(pair))
                .collect::<Result<Vec<_>>>()?
        };

        for analysis in &analyses {
            self.check(analysis)?;
        }

        let snapshots = match self.config.lookup_visibility {
            LookupVisibility::BatchSnapshot => {
                Some((self.pre_catalog.snapshot(), self.post_catalog.snapshot()))
            }
            LookupVisibility::LiveAppend => None,
        };

        let mut report = BatchReport::default();
        for analysis in analyses {
            let pair = self.record(analysis, snapshots.as_ref())?;
            self.aggregate(&mut report, pair);
        }

        info!(
            "Processed {} pairs: {} pre duplicates, {} post duplicates, {} flagged images",
            report.pair_count(),
            report.pre_duplicates.len(),
            report.post_duplicates.len(),
            report.flagged_count()
        );

        Ok(report)
    }

    /// Single pre/post comparison. Tamper scores are returned unfiltered.
    pub fn compare_pair(&self, pre: LabeledImage, post: LabeledImage) -> Result<PairReport> {
        self.config.validate()?;
        let analysis = self.analyze(&ImagePair { pre, post })?;
        self.check(&analysis)?;
        self.record(analysis, None)
    }

    fn analyze(&self, pair: &ImagePair) -> Result<PairAnalysis> {
        let (pre, post) = (&pair.pre.image, &pair.post.image);

        let pre_tamper = TamperScore {
            label: pair.pre.label.clone(),
            severity: self.detector.detect(pre)?,
        };
        let post_tamper = TamperScore {
            label: pair.post.label.clone(),
            severity: self.detector.detect(post)?,
        };

        let (pre_query, pre_archive, _) = self.models.pre.embed_triplet(pre, pre, pre)?;
        let (post_query, post_archive) = self.models.post.embed_pair(post, post)?;

        let (pre_match, post_match) = self.models.matcher.embed_pair(pre, post)?;
        let distance = pre_match.euclidean_distance(&post_match)?;

        debug!(
            "{} vs {}: distance {:.4}, ELA severity {}/{}",
            pair.pre.label, pair.post.label, distance, pre_tamper.severity, post_tamper.severity
        );

        Ok(PairAnalysis {
            pre_tamper,
            post_tamper,
            pre_query,
            pre_archive,
            post_query,
            post_archive,
            direct: MatchResult {
                query: pair.pre.label.clone(),
                matched: pair.post.label.clone(),
                distance,
            },
        })
    }

    fn check(&self, analysis: &PairAnalysis) -> Result<()> {
        self.pre_catalog.check_query(&analysis.pre_query)?;
        self.post_catalog.check_query(&analysis.post_query)?;

        if self.config.archive {
            self.pre_catalog
                .check_entry(&analysis.pre_tamper.label, &analysis.pre_archive)?;
            self.post_catalog
                .check_entry(&analysis.post_tamper.label, &analysis.post_archive)?;
        }
        Ok(())
    }

    /// Looks the pair up in both catalogs and archives its embeddings. Without
    /// snapshots the lookup runs against the live catalogs before archiving.
    fn record(
        &self,
        analysis: PairAnalysis,
        snapshots: Option<&(CatalogSnapshot, CatalogSnapshot)>,
    ) -> Result<PairReport> {
        let (pre_hits, post_hits) = match snapshots {
            Some((pre_snapshot, post_snapshot)) => (
                pre_snapshot.nearest(&analysis.pre_query, self.config.pre_threshold)?,
                post_snapshot.nearest(&analysis.post_query, self.config.post_threshold)?,
            ),
            None => (
                self.pre_catalog
                    .nearest(&analysis.pre_query, self.config.pre_threshold)?,
                self.post_catalog
                    .nearest(&analysis.post_query, self.config.post_threshold)?,
            ),
        };

        if self.config.archive {
            self.pre_catalog
                .append(&analysis.pre_tamper.label, analysis.pre_archive)?;
            self.post_catalog
                .append(&analysis.post_tamper.label, analysis.post_archive)?;
        }

        Ok(PairReport {
            pre_duplicates: to_matches(&analysis.pre_tamper.label, pre_hits),
            post_duplicates: to_matches(&analysis.post_tamper.label, post_hits),
            direct: analysis.direct,
            pre_tamper: analysis.pre_tamper,
            post_tamper: analysis.post_tamper,
        })
    }

    fn aggregate(&self, report: &mut BatchReport, pair: PairReport) {
        let threshold = self.config.tamper_threshold;

        for (score, flagged) in [
            (pair.pre_tamper, &mut report.pre_flagged),
            (pair.post_tamper, &mut report.post_flagged),
        ] {
            if score.severity > threshold {
                warn!(
                    "{} flagged: ELA severity {} exceeds {}",
                    score.label, score.severity, threshold
                );
                flagged.push(score);
            }
        }

        report.matches.push(pair.direct);
        report.pre_duplicates.extend(pair.pre_duplicates);
        report.post_duplicates.extend(pair.post_duplicates);
    }
}

fn detector_for(config: &PipelineConfig) -> TamperDetector {
    TamperDetector::new(config.ela_quality)
        .with_resave_quality(config.ela_resave_quality)
        .with_scale(config.ela_scale)
        .with_amplification(config.amplification)
}

fn to_matches(query: &str, neighbors: Vec<Neighbor>) -> Vec<MatchResult> {
    neighbors
        .into_iter()
        .map(|n| MatchResult {
            query: query.to_string(),
            matched: n.label,
            distance: n.distance,
        })
        .collect()
}
