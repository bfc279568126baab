//! Comparison of the retrieved albedo against alternative albedo products
//! over the same glacier footprint and timestamps.

use crate::bands::BROADBAND_ALBEDO;
use crate::core::glacier::GlacierMask;
use crate::core::retrieval::{AlbedoSummary, RetrievedAlbedo};
use crate::types::{AlbedoError, AlbedoResult, MultiBandRaster, RasterTimeSeries};
use chrono::{DateTime, Datelike, Utc};
use ndarray::Zip;
use serde::Serialize;
use std::collections::BTreeMap;

/// Band name of every extracted product raster
pub const ALBEDO: &str = "albedo";

/// An albedo product that can be compared with the retrieval.
///
/// `extract` yields a raster holding a single `albedo` band (unitless, 0-1)
/// with the product's own validity mask.
pub trait AlbedoProduct: Send + Sync {
    fn name(&self) -> &str;

    fn extract(&self, raster: &MultiBandRaster) -> AlbedoResult<MultiBandRaster>;
}

/// Product whose albedo is one integer band times a scale factor, with
/// out-of-range raw values treated as fill
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledBandProduct {
    name: String,
    band: String,
    scale: f64,
    valid_range: (f64, f64),
}

impl ScaledBandProduct {
    pub fn new(
        name: impl Into<String>,
        band: impl Into<String>,
        scale: f64,
        valid_range: (f64, f64),
    ) -> Self {
        Self {
            name: name.into(),
            band: band.into(),
            scale,
            valid_range,
        }
    }

    pub fn band(&self) -> &str {
        &self.band
    }
}

impl AlbedoProduct for ScaledBandProduct {
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, raster: &MultiBandRaster) -> AlbedoResult<MultiBandRaster> {
        let raw = raster.require_band(&self.band)?;
        let (low, high) = self.valid_range;
        let valid = raw.mapv(|v| v.is_finite() && v >= low && v <= high);
        let scale = self.scale;
        let albedo = Zip::from(raw)
            .and(&valid)
            .map_collect(|&v, &ok| if ok { v * scale } else { 0.0 });

        MultiBandRaster::new(*raster.geometry())
            .with_band(ALBEDO, albedo)?
            .restrict(raster.mask())?
            .restrict(&valid)
    }
}

/// The retrieval's own output as a single `albedo` band
pub fn retrieved_albedo_raster(record: &RetrievedAlbedo) -> AlbedoResult<MultiBandRaster> {
    let broadband = record.raster.require_band(BROADBAND_ALBEDO)?;
    MultiBandRaster::new(*record.raster.geometry())
        .with_band(ALBEDO, broadband.clone())?
        .restrict(record.raster.mask())
}

/// One product observation aligned with one retrieved record
#[derive(Debug, Clone)]
pub struct AlignedRecord {
    pub timestamp: DateTime<Utc>,
    pub product: String,
    /// Product albedo restricted to the glacier mask
    pub raster: MultiBandRaster,
    pub product_summary: Option<AlbedoSummary>,
    pub retrieved_summary: Option<AlbedoSummary>,
}

impl AlignedRecord {
    /// (retrieved, product) values at cells valid in both rasters
    pub fn cell_pairs(&self, retrieved: &RetrievedAlbedo) -> AlbedoResult<Vec<(f64, f64)>> {
        let ours = retrieved_albedo_raster(retrieved)?;
        ours.geometry()
            .ensure_same(self.raster.geometry(), "aligned cell pairs")?;
        let a = ours.require_band(ALBEDO)?;
        let b = self.raster.require_band(ALBEDO)?;
        Ok(Zip::from(a)
            .and(b)
            .and(ours.mask())
            .and(self.raster.mask())
            .fold(Vec::new(), |mut acc, &x, &y, &vx, &vy| {
                if vx && vy {
                    acc.push((x, y));
                }
                acc
            }))
    }
}

/// Pair every retrieved record with the same-timestamp observation of each
/// product, restricted to the glacier mask.
///
/// Records without a product observation at their timestamp are left out,
/// as are observations the product cannot read (a missing band); any other
/// error aborts the alignment.
pub fn align_products(
    retrieved: &[RetrievedAlbedo],
    products: &[(&dyn AlbedoProduct, &RasterTimeSeries)],
    glacier_mask: &GlacierMask,
) -> AlbedoResult<Vec<AlignedRecord>> {
    let mut aligned = Vec::new();
    for (product, series) in products {
        let mut matched = 0usize;
        let mut unreadable = 0usize;
        for record in retrieved {
            let Some(observation) = series.iter().find(|o| o.timestamp == record.timestamp) else {
                continue;
            };
            let extracted = match product.extract(&observation.raster) {
                Ok(extracted) => extracted,
                Err(err) if err.is_recoverable() => {
                    log::warn!(
                        "Skipping {} observation at {}: {}",
                        product.name(),
                        observation.timestamp,
                        err
                    );
                    unreadable += 1;
                    continue;
                }
                Err(err) => return Err(err),
            };
            let raster = extracted.restrict_with(glacier_mask.mask())?;
            let product_summary = AlbedoSummary::from_values(&raster.valid_values(ALBEDO)?);
            aligned.push(AlignedRecord {
                timestamp: record.timestamp,
                product: product.name().to_string(),
                raster,
                product_summary,
                retrieved_summary: record.summary,
            });
            matched += 1;
        }
        log::info!(
            "Aligned {} of {} retrieved records with {} ({} unreadable)",
            matched,
            retrieved.len(),
            product.name(),
            unreadable
        );
    }
    Ok(aligned)
}

/// Error statistics of `test` against `reference`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComparisonStats {
    pub n: usize,
    /// mean(test - reference)
    pub bias: f64,
    pub mae: f64,
    pub rmse: f64,
    /// Sample standard deviation of the differences
    pub std_err: Option<f64>,
    /// Median absolute error
    pub medae: f64,
    /// Pearson correlation
    pub r: Option<f64>,
    /// Least-squares fit test = slope * reference + intercept
    pub slope: Option<f64>,
    pub intercept: Option<f64>,
}

impl ComparisonStats {
    /// `Ok(None)` for empty input; mismatched lengths are an error
    pub fn compute(test: &[f64], reference: &[f64]) -> AlbedoResult<Option<Self>> {
        if test.len() != reference.len() {
            return Err(AlbedoError::Processing(format!(
                "comparison needs paired samples, got {} and {}",
                test.len(),
                reference.len()
            )));
        }
        let n = test.len();
        if n == 0 {
            return Ok(None);
        }
        let count = n as f64;

        let diffs: Vec<f64> = test.iter().zip(reference).map(|(t, r)| t - r).collect();
        let bias = diffs.iter().sum::<f64>() / count;
        let mae = diffs.iter().map(|d| d.abs()).sum::<f64>() / count;
        let rmse = (diffs.iter().map(|d| d * d).sum::<f64>() / count).sqrt();
        let std_err = (n > 1).then(|| {
            (diffs.iter().map(|d| (d - bias).powi(2)).sum::<f64>() / (count - 1.0)).sqrt()
        });

        let mut absolute: Vec<f64> = diffs.iter().map(|d| d.abs()).collect();
        absolute.sort_by(|a, b| a.total_cmp(b));
        let medae = if n % 2 == 1 {
            absolute[n / 2]
        } else {
            (absolute[n / 2 - 1] + absolute[n / 2]) / 2.0
        };

        let mean_test = test.iter().sum::<f64>() / count;
        let mean_ref = reference.iter().sum::<f64>() / count;
        let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
        for (t, r) in test.iter().zip(reference) {
            let dx = r - mean_ref;
            let dy = t - mean_test;
            sxy += dx * dy;
            sxx += dx * dx;
            syy += dy * dy;
        }
        let slope = (sxx > 0.0).then(|| sxy / sxx);
        let intercept = slope.map(|s| mean_test - s * mean_ref);
        let r = (sxx > 0.0 && syy > 0.0).then(|| sxy / (sxx * syy).sqrt());

        Ok(Some(Self {
            n,
            bias,
            mae,
            rmse,
            std_err,
            medae,
            r,
            slope,
            intercept,
        }))
    }

    /// Statistics of per-timestamp glacier means, retrieval as test and the
    /// named product as reference
    pub fn from_aligned(records: &[AlignedRecord], product: &str) -> AlbedoResult<Option<Self>> {
        let (test, reference): (Vec<f64>, Vec<f64>) = records
            .iter()
            .filter(|r| r.product == product)
            .filter_map(|r| Some((r.retrieved_summary?.mean, r.product_summary?.mean)))
            .unzip();
        Self::compute(&test, &reference)
    }

    /// Per-month statistics of the per-timestamp means, keyed by calendar
    /// month (1-12). Months without paired means are absent.
    pub fn monthly(
        records: &[AlignedRecord],
        product: &str,
    ) -> AlbedoResult<BTreeMap<u32, Self>> {
        let mut by_month: BTreeMap<u32, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for record in records.iter().filter(|r| r.product == product) {
            let (Some(ours), Some(theirs)) = (record.retrieved_summary, record.product_summary)
            else {
                continue;
            };
            let (test, reference) = by_month.entry(record.timestamp.month()).or_default();
            test.push(ours.mean);
            reference.push(theirs.mean);
        }

        let mut stats = BTreeMap::new();
        for (month, (test, reference)) in by_month {
            if let Some(month_stats) = Self::compute(&test, &reference)? {
                stats.insert(month, month_stats);
            }
        }
        Ok(stats)
    }

    /// Statistics over (retrieved, product) cell pairs
    pub fn from_cell_pairs(pairs: &[(f64, f64)]) -> AlbedoResult<Option<Self>> {
        let (test, reference): (Vec<f64>, Vec<f64>) = pairs.iter().copied().unzip();
        Self::compute(&test, &reference)
    }

    /// Pixel-level statistics: the cell pairs of every record of `product`
    /// pooled across timestamps. Records with no retrieved counterpart are
    /// ignored.
    pub fn from_pixels(
        records: &[AlignedRecord],
        retrieved: &[RetrievedAlbedo],
        product: &str,
    ) -> AlbedoResult<Option<Self>> {
        let mut pairs = Vec::new();
        for record in records.iter().filter(|r| r.product == product) {
            let Some(ours) = retrieved.iter().find(|r| r.timestamp == record.timestamp) else {
                continue;
            };
            pairs.extend(record.cell_pairs(ours)?);
        }
        log::debug!("{} cell pairs pooled for {}", pairs.len(), product);
        Self::from_cell_pairs(&pairs)
    }
}
