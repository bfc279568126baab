//! Snow / ice discrimination from the Normalized Difference Snow Index.

use crate::bands::{BandId, NDSI, REFLECTANCE_SCALE, SNOW_MASK};
use crate::types::{AlbedoResult, MultiBandRaster, SurfaceClass};
use ndarray::{Array2, Zip};
use std::borrow::Cow;

/// Parameters for surface classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierParams {
    /// NDSI strictly above this value is snow
    pub ndsi_threshold: f64,
}

impl Default for ClassifierParams {
    fn default() -> Self {
        Self { ndsi_threshold: 0.4 }
    }
}

/// Which reflectance stack fed the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandSource {
    TopoCorrected,
    /// Unscaled raw bands, used when no corrected stack is present
    Raw,
}

/// Per-cell index, class and validity
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub ndsi: Array2<f64>,
    pub snow: Array2<bool>,
    /// False where the index is undefined
    pub valid: Array2<bool>,
    pub source: BandSource,
    pub swir_band: BandId,
}

impl Classification {
    pub fn class_at(&self, row: usize, col: usize) -> SurfaceClass {
        if self.snow[[row, col]] {
            SurfaceClass::Snow
        } else {
            SurfaceClass::Ice
        }
    }

    pub fn snow_fraction(&self) -> f64 {
        let valid = self.valid.iter().filter(|&&v| v).count();
        if valid == 0 {
            return 0.0;
        }
        let snow = Zip::from(&self.snow)
            .and(&self.valid)
            .fold(0usize, |acc, &s, &v| acc + usize::from(s && v));
        snow as f64 / valid as f64
    }

    /// Attach `NDSI` and `snow_mask` (1.0 snow, 0.0 ice) and clear undefined cells
    pub fn attach(&self, raster: MultiBandRaster) -> AlbedoResult<MultiBandRaster> {
        raster
            .with_band(NDSI, self.ndsi.clone())?
            .with_band(SNOW_MASK, self.snow.mapv(|s| if s { 1.0 } else { 0.0 }))?
            .restrict(&self.valid)
    }
}

/// Surface classification processor
#[derive(Debug, Clone)]
pub struct SurfaceClassifier {
    params: ClassifierParams,
}

impl SurfaceClassifier {
    pub fn new(params: ClassifierParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(ClassifierParams::default())
    }

    pub fn params(&self) -> &ClassifierParams {
        &self.params
    }

    /// Compute NDSI = (green - swir) / (green + swir) and threshold it.
    ///
    /// Green is band 4; SWIR is band 6 when present, otherwise band 7.
    pub fn classify(&self, raster: &MultiBandRaster) -> AlbedoResult<Classification> {
        let (green, swir, swir_band, source) = select_inputs(raster)?;
        let threshold = self.params.ndsi_threshold;

        let cells = Zip::from(&*green)
            .and(&*swir)
            .map_collect(|&g, &s| ndsi_cell(g, s));

        let ndsi = cells.mapv(|(value, _)| value);
        let valid = cells.mapv(|(_, defined)| defined);
        let snow = Zip::from(&ndsi)
            .and(&valid)
            .map_collect(|&value, &defined| defined && value > threshold);

        let undefined = valid.iter().filter(|&&defined| !defined).count();
        if undefined > 0 {
            log::debug!("NDSI undefined for {} cells, cleared from the mask", undefined);
        }

        let classification = Classification {
            ndsi,
            snow,
            valid,
            source,
            swir_band,
        };
        log::debug!(
            "NDSI from {:?} bands (green={}, swir={}): snow fraction {:.3}",
            source,
            BandId::GREEN,
            swir_band,
            classification.snow_fraction()
        );
        Ok(classification)
    }
}

impl Default for SurfaceClassifier {
    fn default() -> Self {
        Self::standard()
    }
}

/// NDSI of one cell and whether it is defined; undefined cells store 0.0.
///
/// Negative reflectance puts the ratio outside [-1, 1], so such cells are
/// undefined rather than clamped onto a class.
fn ndsi_cell(green: f64, swir: f64) -> (f64, bool) {
    if green < 0.0 || swir < 0.0 {
        return (0.0, false);
    }
    let sum = green + swir;
    if sum == 0.0 {
        return (0.0, false);
    }
    let value = (green - swir) / sum;
    if value.is_finite() && (-1.0..=1.0).contains(&value) {
        (value, true)
    } else {
        (0.0, false)
    }
}

type Inputs<'a> = (Cow<'a, Array2<f64>>, Cow<'a, Array2<f64>>, BandId, BandSource);

fn select_inputs(raster: &MultiBandRaster) -> AlbedoResult<Inputs<'_>> {
    let swir_corrected = [BandId::B6, BandId::B7]
        .into_iter()
        .find_map(|band| raster.band(&band.topo_name()).map(|data| (band, data)));
    if let (Some(green), Some((swir_band, swir))) =
        (raster.band(&BandId::GREEN.topo_name()), swir_corrected)
    {
        return Ok((
            Cow::Borrowed(green),
            Cow::Borrowed(swir),
            swir_band,
            BandSource::TopoCorrected,
        ));
    }

    let green = raster.require_band(&BandId::GREEN.raw_name())?;
    let (swir_band, swir) = match raster.band(&BandId::B6.raw_name()) {
        Some(data) => (BandId::B6, data),
        None => (BandId::B7, raster.require_band(&BandId::B7.raw_name())?),
    };
    log::warn!(
        "Topographically corrected bands missing, classifying from raw {} and {}",
        BandId::GREEN,
        swir_band
    );
    Ok((
        Cow::Owned(green.mapv(|v| v * REFLECTANCE_SCALE)),
        Cow::Owned(swir.mapv(|v| v * REFLECTANCE_SCALE)),
        swir_band,
        BandSource::Raw,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoTransform, GridGeometry};
    use approx::assert_abs_diff_eq;

    fn geometry(cols: usize) -> GridGeometry {
        GridGeometry::new(32611, GeoTransform::north_up(0.0, 0.0, 500.0), 1, cols)
    }

    fn corrected(green: Vec<f64>, swir: Vec<f64>) -> MultiBandRaster {
        let cols = green.len();
        MultiBandRaster::new(geometry(cols))
            .with_band(BandId::B4.topo_name(), Array2::from_shape_vec((1, cols), green).unwrap())
            .unwrap()
            .with_band(BandId::B7.topo_name(), Array2::from_shape_vec((1, cols), swir).unwrap())
            .unwrap()
    }

    #[test]
    fn test_snow_and_ice_split() {
        let raster = corrected(vec![0.5, 0.3, 0.4], vec![0.1, 0.2, 0.4]);
        let result = SurfaceClassifier::standard().classify(&raster).unwrap();
        assert_abs_diff_eq!(result.ndsi[[0, 0]], 0.4 / 0.6, epsilon = 1e-12);
        assert_eq!(result.class_at(0, 0), SurfaceClass::Snow);
        assert_eq!(result.class_at(0, 1), SurfaceClass::Ice);
        assert_eq!(result.class_at(0, 2), SurfaceClass::Ice);
        assert_eq!(result.source, BandSource::TopoCorrected);
        assert_eq!(result.swir_band, BandId::B7);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        // NDSI of 0.4 sits on the threshold and is not snow
        let raster = corrected(vec![0.7], vec![0.3]);
        let result = SurfaceClassifier::standard().classify(&raster).unwrap();
        assert!(!result.snow[[0, 0]]);
        let low = SurfaceClassifier::new(ClassifierParams { ndsi_threshold: 0.3 });
        assert!(low.classify(&raster).unwrap().snow[[0, 0]]);
    }

    #[test]
    fn test_zero_sum_is_invalid_not_nan() {
        let raster = corrected(vec![0.0, 0.2, f64::NAN], vec![0.0, -0.2, 0.1]);
        let result = SurfaceClassifier::standard().classify(&raster).unwrap();
        assert_eq!(result.valid.iter().copied().collect::<Vec<_>>(), vec![false, false, false]);
        assert!(result.ndsi.iter().all(|&v| v == 0.0));
        assert!(!result.snow.iter().any(|&s| s));

        let attached = result.attach(raster).unwrap();
        assert_eq!(attached.valid_count(), 0);
        assert!(attached.band(NDSI).unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_negative_reflectance_is_undefined() {
        // 0.3 / 0.1 would be an NDSI of 3.0
        let raster = corrected(vec![0.2, -0.05, 0.5], vec![-0.1, 0.4, 0.1]);
        let result = SurfaceClassifier::standard().classify(&raster).unwrap();
        assert_eq!(result.valid.iter().copied().collect::<Vec<_>>(), vec![false, false, true]);
        assert_eq!(result.ndsi[[0, 0]], 0.0);
        assert_eq!(result.ndsi[[0, 1]], 0.0);
        assert_eq!(result.class_at(0, 2), SurfaceClass::Snow);
        assert!(!result.snow[[0, 0]]);

        let attached = result.attach(raster).unwrap();
        assert_eq!(attached.valid_count(), 1);
    }

    #[test]
    fn test_ndsi_within_unit_range() {
        let raster = corrected(vec![0.9, 0.01, 0.3], vec![0.0, 0.8, 0.3]);
        let result = SurfaceClassifier::standard().classify(&raster).unwrap();
        assert!(result.ndsi.iter().all(|&v| (-1.0..=1.0).contains(&v)));
        assert_eq!(result.ndsi[[0, 0]], 1.0);
    }

    #[test]
    fn test_band6_preferred_over_band7() {
        let raster = corrected(vec![0.5], vec![0.4])
            .with_band(BandId::B6.topo_name(), Array2::from_elem((1, 1), 0.1))
            .unwrap();
        let result = SurfaceClassifier::standard().classify(&raster).unwrap();
        assert_eq!(result.swir_band, BandId::B6);
        assert!(result.snow[[0, 0]]);
    }

    #[test]
    fn test_raw_fallback_is_unscaled() {
        let raster = MultiBandRaster::new(geometry(1))
            .with_band(BandId::B4.raw_name(), Array2::from_elem((1, 1), 5000.0))
            .unwrap()
            .with_band(BandId::B7.raw_name(), Array2::from_elem((1, 1), 1000.0))
            .unwrap();
        let result = SurfaceClassifier::standard().classify(&raster).unwrap();
        assert_eq!(result.source, BandSource::Raw);
        assert_abs_diff_eq!(result.ndsi[[0, 0]], 4.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_bands_are_recoverable() {
        let raster = MultiBandRaster::new(geometry(1));
        let err = SurfaceClassifier::standard().classify(&raster).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_attach_adds_bands() {
        let raster = corrected(vec![0.5, 0.3], vec![0.1, 0.2]);
        let result = SurfaceClassifier::standard().classify(&raster).unwrap();
        let attached = result.attach(raster).unwrap();
        let snow = attached.band(SNOW_MASK).unwrap();
        assert_eq!(snow[[0, 0]], 1.0);
        assert_eq!(snow[[0, 1]], 0.0);
        assert_eq!(attached.valid_count(), 2);
    }
}
