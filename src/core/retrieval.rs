//! Per-observation retrieval pipeline and time-series driver.

use crate::bands::BROADBAND_ALBEDO;
use crate::config::RetrievalConfig;
use crate::core::brdf::AnisotropyCorrector;
use crate::core::broadband::{merge_narrowbands, BroadbandConverter};
use crate::core::classify::{ClassifierParams, SurfaceClassifier};
use crate::core::glacier::{GlacierMask, GlacierMaskCache, GlacierMaskParams};
use crate::core::quality::{QaOutcome, QualityFilter};
use crate::core::terrain::TerrainGrids;
use crate::core::topographic::{TopographicCorrector, TopographicParams};
use crate::types::{
    AlbedoError, AlbedoResult, MultiBandRaster, Observation, Platform, RasterTimeSeries,
};
use chrono::{DateTime, Utc};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::Serialize;
use std::sync::Arc;

/// Stages an observation passes through, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RetrievalState {
    Raw,
    QualityFiltered,
    TopoCorrected,
    Classified,
    /// Snow and ice models applied over the whole grid
    AnisotropyCorrected,
    Merged,
    BroadbandComputed,
    GlacierMasked,
    Done,
}

impl RetrievalState {
    pub const SEQUENCE: [RetrievalState; 9] = [
        RetrievalState::Raw,
        RetrievalState::QualityFiltered,
        RetrievalState::TopoCorrected,
        RetrievalState::Classified,
        RetrievalState::AnisotropyCorrected,
        RetrievalState::Merged,
        RetrievalState::BroadbandComputed,
        RetrievalState::GlacierMasked,
        RetrievalState::Done,
    ];

    pub fn next(self) -> Option<RetrievalState> {
        let index = Self::SEQUENCE.iter().position(|&s| s == self)?;
        Self::SEQUENCE.get(index + 1).copied()
    }
}

/// States visited by one observation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetrievalTrace {
    states: Vec<RetrievalState>,
}

impl RetrievalTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transition; only the successor of the current state is allowed
    pub fn enter(&mut self, state: RetrievalState) -> AlbedoResult<()> {
        let expected = match self.states.last() {
            None => Some(RetrievalState::Raw),
            Some(current) => current.next(),
        };
        if expected != Some(state) {
            return Err(AlbedoError::Processing(format!(
                "invalid retrieval transition {:?} -> {:?}",
                self.states.last(),
                state
            )));
        }
        self.states.push(state);
        Ok(())
    }

    pub fn states(&self) -> &[RetrievalState] {
        &self.states
    }

    pub fn current(&self) -> Option<RetrievalState> {
        self.states.last().copied()
    }

    pub fn is_complete(&self) -> bool {
        self.current() == Some(RetrievalState::Done)
    }
}

/// Statistics of the broadband albedo over valid cells
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlbedoSummary {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl AlbedoSummary {
    /// `None` when there are no values
    pub fn from_values(values: &[f64]) -> Option<Self> {
        if values.is_empty() {
            return None;
        }
        let count = values.len();
        let mean = values.iter().sum::<f64>() / count as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let median = if count % 2 == 1 {
            sorted[count / 2]
        } else {
            (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
        };

        Some(Self {
            count,
            mean,
            median,
            std_dev: variance.sqrt(),
            min: sorted[0],
            max: sorted[count - 1],
        })
    }
}

/// Output of one observation that reached `Done`
#[derive(Debug, Clone)]
pub struct RetrievedAlbedo {
    pub timestamp: DateTime<Utc>,
    pub platform: Platform,
    pub product_id: Option<String>,
    /// Broadband albedo with diagnostic bands; the mask is the conjunction of
    /// quality, illumination, index and glacier validity
    pub raster: MultiBandRaster,
    pub summary: Option<AlbedoSummary>,
    pub trace: RetrievalTrace,
}

/// Result of processing a whole series
#[derive(Debug, Clone, Default)]
pub struct SeriesOutcome {
    /// Retained records in increasing timestamp order
    pub records: Vec<RetrievedAlbedo>,
    pub out_of_season: usize,
    /// Observations skipped for a missing band
    pub skipped: usize,
    /// Observations aborted on a fatal error
    pub failed: usize,
    /// Records dropped in favour of the priority platform
    pub deduplicated: usize,
}

impl SeriesOutcome {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.records.iter().map(|r| r.timestamp).collect()
    }
}

/// Retrieval orchestrator
#[derive(Debug)]
pub struct AlbedoRetrieval {
    config: RetrievalConfig,
    quality: QualityFilter,
    topographic: TopographicCorrector,
    classifier: SurfaceClassifier,
    anisotropy: AnisotropyCorrector,
    converter: BroadbandConverter,
    terrain: Arc<TerrainGrids>,
    glacier_mask: Arc<GlacierMask>,
}

impl AlbedoRetrieval {
    /// Build the pipeline; terrain and glacier mask must share one grid
    pub fn new(
        config: RetrievalConfig,
        terrain: Arc<TerrainGrids>,
        glacier_mask: Arc<GlacierMask>,
    ) -> AlbedoResult<Self> {
        config.validate()?;
        terrain
            .geometry()
            .ensure_same(glacier_mask.geometry(), "retrieval auxiliary grids")?;

        Ok(Self {
            quality: QualityFilter::new(config.quality_profile()),
            topographic: TopographicCorrector::new(TopographicParams {
                factor_range: config.topo_factor_range,
                ..TopographicParams::default()
            }),
            classifier: SurfaceClassifier::new(ClassifierParams {
                ndsi_threshold: config.ndsi_threshold,
            }),
            anisotropy: AnisotropyCorrector::new(config.brdf_clamp),
            converter: BroadbandConverter::standard(),
            terrain,
            glacier_mask,
            config,
        })
    }

    /// Build the pipeline with the glacier mask taken from a cache using the
    /// configured threshold and supersampling
    pub fn with_glacier_cache(
        config: RetrievalConfig,
        terrain: Arc<TerrainGrids>,
        cache: &GlacierMaskCache,
    ) -> AlbedoResult<Self> {
        let params = GlacierMaskParams {
            threshold: config.glacier_fraction_threshold,
            supersampling: config.glacier_supersampling,
        };
        let glacier_mask = cache.get_or_build(terrain.geometry(), params)?;
        Self::new(config, terrain, glacier_mask)
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    pub fn glacier_mask(&self) -> &GlacierMask {
        &self.glacier_mask
    }

    /// Run one observation to `Done`.
    ///
    /// `Ok(None)` means the observation was skipped for a missing band;
    /// `Err` is a fatal error for this observation only.
    pub fn process_observation(
        &self,
        observation: &Observation,
    ) -> AlbedoResult<Option<RetrievedAlbedo>> {
        match self.run(observation) {
            Ok(retrieved) => Ok(Some(retrieved)),
            Err(err) if err.is_recoverable() => {
                log::warn!(
                    "Skipping {} observation at {}: {}",
                    observation.platform,
                    observation.timestamp,
                    err
                );
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    fn run(&self, observation: &Observation) -> AlbedoResult<RetrievedAlbedo> {
        let raster = &observation.raster;
        raster
            .geometry()
            .ensure_same(self.terrain.geometry(), "observation grid")?;

        let mut trace = RetrievalTrace::new();
        trace.enter(RetrievalState::Raw)?;

        let mask = match self.quality.evaluate(raster) {
            QaOutcome::Filtered(mask) => mask,
            QaOutcome::MissingQualityBand { band, .. } => {
                return Err(AlbedoError::MissingBand { band })
            }
        };
        let working = raster.clone().restrict_with(&mask)?;
        trace.enter(RetrievalState::QualityFiltered)?;

        let working = self.topographic.correct(&working, &self.terrain)?;
        trace.enter(RetrievalState::TopoCorrected)?;

        let classification = self.classifier.classify(&working)?;
        let working = classification.attach(working)?;
        trace.enter(RetrievalState::Classified)?;

        let (snow, ice) = self.anisotropy.correct_both(&working)?;
        trace.enter(RetrievalState::AnisotropyCorrected)?;

        let merged = merge_narrowbands(&snow, &ice, &classification.snow)?;
        let working = merged.attach(working)?;
        trace.enter(RetrievalState::Merged)?;

        let albedo = self.converter.convert(&merged, &classification.snow)?;
        let working = albedo.attach(working)?;
        trace.enter(RetrievalState::BroadbandComputed)?;

        let working = self.glacier_mask.apply(working)?;
        trace.enter(RetrievalState::GlacierMasked)?;

        let summary = AlbedoSummary::from_values(&working.valid_values(BROADBAND_ALBEDO)?);
        trace.enter(RetrievalState::Done)?;

        log::debug!(
            "{} observation at {}: {} valid glacier cells",
            observation.platform,
            observation.timestamp,
            working.valid_count()
        );

        Ok(RetrievedAlbedo {
            timestamp: observation.timestamp,
            platform: observation.platform,
            product_id: observation.product_id.clone(),
            raster: working,
            summary,
            trace,
        })
    }

    /// Process every in-season observation and order the results.
    ///
    /// Per-observation failures are counted, never propagated. When several
    /// records share a timestamp the priority platform's record is kept.
    pub fn process_series(&self, series: &RasterTimeSeries) -> SeriesOutcome {
        let season = self.config.melt_season;
        let candidates: Vec<&Observation> = series
            .iter()
            .filter(|o| season.contains(&o.timestamp))
            .collect();
        let mut outcome = SeriesOutcome {
            out_of_season: series.len() - candidates.len(),
            ..SeriesOutcome::default()
        };

        log::info!(
            "Processing {} of {} observations ({} outside melt season)",
            candidates.len(),
            series.len(),
            outcome.out_of_season
        );

        #[cfg(feature = "parallel")]
        let results: Vec<_> = candidates
            .par_iter()
            .map(|o| (*o, self.process_observation(o)))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = candidates
            .iter()
            .map(|o| (*o, self.process_observation(o)))
            .collect();

        for (observation, result) in results {
            match result {
                Ok(Some(record)) => outcome.records.push(record),
                Ok(None) => outcome.skipped += 1,
                Err(err) => {
                    log::error!(
                        "Retrieval failed for {} observation at {}: {}",
                        observation.platform,
                        observation.timestamp,
                        err
                    );
                    outcome.failed += 1;
                }
            }
        }

        let priority = self.config.priority_platform;
        outcome
            .records
            .sort_by_key(|r| (r.timestamp, r.platform != priority));
        let before = outcome.records.len();
        outcome
            .records
            .dedup_by(|later, kept| later.timestamp == kept.timestamp);
        outcome.deduplicated = before - outcome.records.len();

        log::info!(
            "Retrieved {} records ({} skipped, {} failed, {} duplicates dropped)",
            outcome.records.len(),
            outcome.skipped,
            outcome.failed,
            outcome.deduplicated
        );
        outcome
    }
}
