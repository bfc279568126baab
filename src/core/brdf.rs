//! Anisotropic reflectance correction with the empirically fitted snow (P1)
//! and ice (P2) angular models of Ren et al.
//!
//! Each model turns a topographically corrected reflectance `r` into a
//! narrowband albedo `r - f̃(θv, φ)`, where θv is the corrected sensor zenith
//! and φ the relative azimuth folded into [0, π].

use crate::bands::{
    BandId, ANGLE_SCALE, SENSOR_AZIMUTH, SENSOR_ZENITH_CORRECTED, SOLAR_AZIMUTH,
};
use crate::types::{AlbedoError, AlbedoResult, MultiBandRaster, SurfaceClass};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;

/// Angular decay constant of the ice model for band 7
pub const ICE_B7_THETA_C: f64 = 0.575;

/// Fitted coefficients of one (class, band) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BrdfCoefficients {
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
    /// Angular decay constant θc (radians)
    pub theta_c: f64,
}

impl BrdfCoefficients {
    pub const fn new(c1: f64, c2: f64, c3: f64, theta_c: f64) -> Self {
        Self { c1, c2, c3, theta_c }
    }
}

/// Closed-form anisotropy models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnisotropyModel {
    /// P1, fitted over snow
    Snow,
    /// P2, fitted over bare ice
    Ice,
}

impl AnisotropyModel {
    /// Anisotropy term f̃ for sensor zenith `theta_v` and relative azimuth
    /// `phi`, both in radians
    pub fn anisotropy(&self, coefficients: &BrdfCoefficients, theta_v: f64, phi: f64) -> f64 {
        let BrdfCoefficients { c1, c2, c3, theta_c } = *coefficients;
        let cos_phi = phi.cos();
        let theta_sq = theta_v * theta_v;
        let shape = match self {
            AnisotropyModel::Snow => {
                let g1 = theta_sq;
                let g2 = g1 * cos_phi;
                let g3 = g1 * cos_phi * cos_phi;
                c1 * (g1 + 0.5 - PI * PI / 8.0) + c2 * g2 + c3 * (g3 + 0.25 - PI * PI / 16.0)
            }
            AnisotropyModel::Ice => {
                let g1 = theta_v.cos();
                let g2 = theta_sq * cos_phi;
                let g3 = theta_sq * cos_phi * cos_phi;
                c1 * (g1 - 2.0 / 3.0) + c2 * g2 + c3 * (g3 + 0.25 - PI * PI / 16.0)
            }
        };
        shape * (-theta_v / theta_c).exp()
    }
}

/// Coefficient table of one surface class.
///
/// A band absent from the table is not produced for that class.
#[derive(Debug, Clone, PartialEq)]
pub struct BrdfTable {
    class: SurfaceClass,
    model: AnisotropyModel,
    coefficients: BTreeMap<BandId, BrdfCoefficients>,
}

impl BrdfTable {
    pub fn new(
        class: SurfaceClass,
        model: AnisotropyModel,
        coefficients: BTreeMap<BandId, BrdfCoefficients>,
    ) -> Self {
        Self {
            class,
            model,
            coefficients,
        }
    }

    /// Snow table (P1); band 4 has no snow fit
    pub fn snow() -> Self {
        let coefficients = BTreeMap::from([
            (BandId::B1, BrdfCoefficients::new(0.00083, 0.00384, 0.00452, 0.34527)),
            (BandId::B2, BrdfCoefficients::new(0.00123, 0.00459, 0.00521, 0.34834)),
            (BandId::B3, BrdfCoefficients::new(0.00000, 0.00001, 0.00002, 0.12131)),
            (BandId::B5, BrdfCoefficients::new(0.00663, 0.01081, 0.01076, 0.46132)),
            (BandId::B7, BrdfCoefficients::new(0.00622, 0.01410, 0.01314, 0.55261)),
        ]);
        Self::new(SurfaceClass::Snow, AnisotropyModel::Snow, coefficients)
    }

    /// Ice table (P2)
    pub fn ice() -> Self {
        let coefficients = BTreeMap::from([
            (BandId::B1, BrdfCoefficients::new(-0.00054, 0.00002, 0.00001, 0.17600)),
            (BandId::B2, BrdfCoefficients::new(-0.00924, 0.00033, -0.00005, 0.31750)),
            (BandId::B3, BrdfCoefficients::new(-0.00369, 0.00000, 0.00007, 0.27632)),
            (BandId::B4, BrdfCoefficients::new(-0.02920, -0.00810, 0.00462, 0.52360)),
            (BandId::B5, BrdfCoefficients::new(-0.02388, 0.00656, 0.00227, 0.58473)),
            (BandId::B7, BrdfCoefficients::new(-0.02081, 0.00683, 0.00390, ICE_B7_THETA_C)),
        ]);
        Self::new(SurfaceClass::Ice, AnisotropyModel::Ice, coefficients)
    }

    pub fn class(&self) -> SurfaceClass {
        self.class
    }

    pub fn model(&self) -> AnisotropyModel {
        self.model
    }

    pub fn get(&self, band: BandId) -> Option<&BrdfCoefficients> {
        self.coefficients.get(&band)
    }

    pub fn bands(&self) -> impl Iterator<Item = BandId> + '_ {
        self.coefficients.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }
}

/// Whether `r - f̃` is clamped to [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BrdfClampPolicy {
    ClampUnit,
    #[default]
    Unclamped,
}

impl BrdfClampPolicy {
    pub fn apply(&self, value: f64) -> f64 {
        match self {
            BrdfClampPolicy::ClampUnit => value.clamp(0.0, 1.0),
            BrdfClampPolicy::Unclamped => value,
        }
    }
}

/// Narrowband albedos of one class, holding only the bands of its table
#[derive(Debug, Clone, PartialEq)]
pub struct NarrowbandStack {
    class: SurfaceClass,
    bands: BTreeMap<BandId, Array2<f64>>,
}

impl NarrowbandStack {
    pub fn new(class: SurfaceClass, bands: BTreeMap<BandId, Array2<f64>>) -> Self {
        Self { class, bands }
    }

    pub fn class(&self) -> SurfaceClass {
        self.class
    }

    pub fn get(&self, band: BandId) -> Option<&Array2<f64>> {
        self.bands.get(&band)
    }

    pub fn contains(&self, band: BandId) -> bool {
        self.bands.contains_key(&band)
    }

    pub fn bands(&self) -> impl Iterator<Item = BandId> + '_ {
        self.bands.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }
}

/// Anisotropy correction processor
#[derive(Debug, Clone)]
pub struct AnisotropyCorrector {
    tables: BTreeMap<SurfaceClass, BrdfTable>,
    clamp: BrdfClampPolicy,
}

impl AnisotropyCorrector {
    /// Corrector with the Ren et al. snow and ice tables
    pub fn new(clamp: BrdfClampPolicy) -> Self {
        Self::with_tables([BrdfTable::snow(), BrdfTable::ice()], clamp)
    }

    pub fn with_tables(tables: impl IntoIterator<Item = BrdfTable>, clamp: BrdfClampPolicy) -> Self {
        Self {
            tables: tables.into_iter().map(|t| (t.class(), t)).collect(),
            clamp,
        }
    }

    pub fn clamp_policy(&self) -> BrdfClampPolicy {
        self.clamp
    }

    /// Coefficient table of a class; a missing or empty table is a contract
    /// violation
    pub fn table(&self, class: SurfaceClass) -> AlbedoResult<&BrdfTable> {
        match self.tables.get(&class) {
            Some(table) if !table.is_empty() => Ok(table),
            _ => Err(AlbedoError::MissingCoefficientTable(class)),
        }
    }

    /// Apply one class's model over the whole grid
    pub fn correct(
        &self,
        raster: &MultiBandRaster,
        class: SurfaceClass,
    ) -> AlbedoResult<NarrowbandStack> {
        let table = self.table(class)?;
        let viewing = viewing_geometry(raster)?;
        let model = table.model();
        let clamp = self.clamp;

        let mut bands = BTreeMap::new();
        for band in table.bands() {
            let Some(coefficients) = table.get(band).copied() else {
                continue;
            };
            let reflectance = raster.require_band(&band.topo_name())?;
            let zip = Zip::from(reflectance).and(&viewing);
            let cell = |&r: &f64, &(theta_v, phi): &(f64, f64)| {
                clamp.apply(r - model.anisotropy(&coefficients, theta_v, phi))
            };

            #[cfg(feature = "parallel")]
            let narrowband = zip.par_map_collect(cell);
            #[cfg(not(feature = "parallel"))]
            let narrowband = zip.map_collect(cell);

            bands.insert(band, narrowband);
        }

        log::debug!(
            "Anisotropy correction ({}) produced {} narrowbands",
            class,
            bands.len()
        );
        Ok(NarrowbandStack::new(class, bands))
    }

    /// Snow and ice stacks over the full grid
    pub fn correct_both(
        &self,
        raster: &MultiBandRaster,
    ) -> AlbedoResult<(NarrowbandStack, NarrowbandStack)> {
        #[cfg(feature = "parallel")]
        let (snow, ice) = rayon::join(
            || self.correct(raster, SurfaceClass::Snow),
            || self.correct(raster, SurfaceClass::Ice),
        );
        #[cfg(not(feature = "parallel"))]
        let (snow, ice) = (
            self.correct(raster, SurfaceClass::Snow),
            self.correct(raster, SurfaceClass::Ice),
        );
        Ok((snow?, ice?))
    }
}

impl Default for AnisotropyCorrector {
    fn default() -> Self {
        Self::new(BrdfClampPolicy::default())
    }
}

/// Fold an azimuth difference into [0, π]
pub fn relative_azimuth(solar_azimuth: f64, sensor_azimuth: f64) -> f64 {
    let difference = solar_azimuth - sensor_azimuth;
    let reduced = (difference + PI).rem_euclid(2.0 * PI) - PI;
    reduced.abs()
}

/// Per-cell (θv, φ) in radians
fn viewing_geometry(raster: &MultiBandRaster) -> AlbedoResult<Array2<(f64, f64)>> {
    let sensor_zenith = raster.require_band(SENSOR_ZENITH_CORRECTED)?;
    let solar_azimuth = raster.require_band(SOLAR_AZIMUTH)?;
    let sensor_azimuth = raster.require_band(SENSOR_AZIMUTH)?;
    Ok(Zip::from(sensor_zenith)
        .and(solar_azimuth)
        .and(sensor_azimuth)
        .map_collect(|&vz_deg, &sa, &va| {
            let phi = relative_azimuth(
                (sa * ANGLE_SCALE).to_radians(),
                (va * ANGLE_SCALE).to_radians(),
            );
            (vz_deg.to_radians(), phi)
        }))
}
