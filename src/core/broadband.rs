use crate::bands::{BandId, BROADBAND_ALBEDO, ICE_ALBEDO, SNOW_ALBEDO};
use crate::core::brdf::NarrowbandStack;
use crate::types::{AlbedoError, AlbedoResult, MultiBandRaster, SurfaceClass};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Narrowband albedos after per-cell class selection.
///
/// Holds every retrieval band, so the broadband sums always have a term.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedNarrowbands {
    bands: BTreeMap<BandId, Array2<f64>>,
}

impl MergedNarrowbands {
    pub fn get(&self, band: BandId) -> Option<&Array2<f64>> {
        self.bands.get(&band)
    }

    pub fn bands(&self) -> impl Iterator<Item = (BandId, &Array2<f64>)> {
        self.bands.iter().map(|(&band, data)| (band, data))
    }

    /// Add `narrowband_bN` bands to a raster
    pub fn attach(&self, mut raster: MultiBandRaster) -> AlbedoResult<MultiBandRaster> {
        for (band, data) in &self.bands {
            raster = raster.with_band(band.narrowband_name(), data.clone())?;
        }
        Ok(raster)
    }
}

/// Select the snow result where `snow_mask` is set and the ice result
/// elsewhere.
///
/// A band without a snow fit takes the ice value everywhere. A band missing
/// from a stack is zero where that stack would have been selected.
pub fn merge_narrowbands(
    snow: &NarrowbandStack,
    ice: &NarrowbandStack,
    snow_mask: &Array2<bool>,
) -> AlbedoResult<MergedNarrowbands> {
    if snow.class() != SurfaceClass::Snow || ice.class() != SurfaceClass::Ice {
        return Err(AlbedoError::Processing(format!(
            "merge expects (snow, ice) stacks, got ({}, {})",
            snow.class(),
            ice.class()
        )));
    }

    let shape = snow_mask.dim();
    for stack in [snow, ice] {
        for band in stack.bands() {
            if let Some(data) = stack.get(band) {
                if data.dim() != shape {
                    return Err(AlbedoError::InvalidGeometry(format!(
                        "{} narrowband {} has shape {:?}, class mask {:?}",
                        stack.class(),
                        band,
                        data.dim(),
                        shape
                    )));
                }
            }
        }
    }

    let mut bands = BTreeMap::new();
    for band in BandId::RETRIEVAL {
        let merged = match (snow.get(band), ice.get(band)) {
            (Some(snow_values), Some(ice_values)) => select(snow_mask, snow_values, ice_values),
            (None, Some(ice_values)) => ice_values.clone(),
            (Some(snow_values), None) => {
                log::debug!("No ice narrowband for {}, using zero on ice cells", band);
                Zip::from(snow_mask)
                    .and(snow_values)
                    .map_collect(|&is_snow, &s| if is_snow { s } else { 0.0 })
            }
            (None, None) => {
                log::debug!("No narrowband for {} in either class, using zero", band);
                Array2::zeros(shape)
            }
        };
        bands.insert(band, merged);
    }

    Ok(MergedNarrowbands { bands })
}

fn select(snow_mask: &Array2<bool>, snow: &Array2<f64>, ice: &Array2<f64>) -> Array2<f64> {
    Zip::from(snow_mask)
        .and(snow)
        .and(ice)
        .map_collect(|&is_snow, &s, &i| if is_snow { s } else { i })
}

/// Linear narrowband-to-broadband equation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadbandCoefficients {
    pub constant: f64,
    pub weights: BTreeMap<BandId, f64>,
}

impl BroadbandCoefficients {
    /// Ren et al. bare-ice equation
    pub fn ice() -> Self {
        Self {
            constant: -0.0015,
            weights: BTreeMap::from([
                (BandId::B1, 0.160),
                (BandId::B2, 0.291),
                (BandId::B3, 0.243),
                (BandId::B4, 0.116),
                (BandId::B5, 0.112),
                (BandId::B7, 0.081),
            ]),
        }
    }

    /// Ren et al. snow equation; band 4 does not enter
    pub fn snow() -> Self {
        Self {
            constant: -0.0093,
            weights: BTreeMap::from([
                (BandId::B1, 0.1574),
                (BandId::B2, 0.2789),
                (BandId::B3, 0.3829),
                (BandId::B5, 0.1131),
                (BandId::B7, 0.0694),
            ]),
        }
    }

    /// Evaluate the equation over whole grids
    pub fn evaluate(&self, narrowbands: &MergedNarrowbands) -> AlbedoResult<Array2<f64>> {
        let mut weighted: Option<Array2<f64>> = None;
        for (&band, &weight) in &self.weights {
            let values = narrowbands.get(band).ok_or_else(|| {
                AlbedoError::Processing(format!("merged stack lacks narrowband {}", band))
            })?;
            match weighted.as_mut() {
                Some(sum) => sum.zip_mut_with(values, |acc, &v| *acc += weight * v),
                None => weighted = Some(values.mapv(|v| weight * v)),
            }
        }
        let sum = weighted.ok_or_else(|| {
            AlbedoError::Processing("broadband equation without band weights".to_string())
        })?;
        Ok(sum.mapv(|v| self.constant + v))
    }
}

/// Ice-branch, snow-branch and selected broadband albedo
#[derive(Debug, Clone, PartialEq)]
pub struct BroadbandAlbedo {
    pub ice: Array2<f64>,
    pub snow: Array2<f64>,
    /// Class-selected value clamped to [0, 1]; 0.0 where not finite
    pub broadband: Array2<f64>,
    pub finite: Array2<bool>,
}

impl BroadbandAlbedo {
    /// Add `ice_albedo`, `snow_albedo` and `broadband_albedo` and clear
    /// cells whose broadband value is not finite
    pub fn attach(&self, raster: MultiBandRaster) -> AlbedoResult<MultiBandRaster> {
        raster
            .with_band(ICE_ALBEDO, self.ice.clone())?
            .with_band(SNOW_ALBEDO, self.snow.clone())?
            .with_band(BROADBAND_ALBEDO, self.broadband.clone())?
            .restrict(&self.finite)
    }
}

/// Narrowband to broadband conversion processor
#[derive(Debug, Clone)]
pub struct BroadbandConverter {
    ice: BroadbandCoefficients,
    snow: BroadbandCoefficients,
}

impl BroadbandConverter {
    pub fn new(ice: BroadbandCoefficients, snow: BroadbandCoefficients) -> Self {
        Self { ice, snow }
    }

    pub fn standard() -> Self {
        Self::new(BroadbandCoefficients::ice(), BroadbandCoefficients::snow())
    }

    /// Evaluate both equations everywhere, then select by class and clamp
    pub fn convert(
        &self,
        narrowbands: &MergedNarrowbands,
        snow_mask: &Array2<bool>,
    ) -> AlbedoResult<BroadbandAlbedo> {
        let ice = self.ice.evaluate(narrowbands)?;
        let snow = self.snow.evaluate(narrowbands)?;
        if ice.dim() != snow_mask.dim() {
            return Err(AlbedoError::InvalidGeometry(format!(
                "narrowband shape {:?} does not match class mask {:?}",
                ice.dim(),
                snow_mask.dim()
            )));
        }

        let selected = select(snow_mask, &snow, &ice);
        let finite = selected.mapv(f64::is_finite);
        let broadband = selected.mapv(|v| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 });

        Ok(BroadbandAlbedo {
            ice,
            snow,
            broadband,
            finite,
        })
    }
}

impl Default for BroadbandConverter {
    fn default() -> Self {
        Self::standard()
    }
}
