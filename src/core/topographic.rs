use crate::bands::{
    BandId, ANGLE_SCALE, REFLECTANCE_SCALE, SENSOR_AZIMUTH, SENSOR_ZENITH,
    SENSOR_ZENITH_CORRECTED, SOLAR_AZIMUTH, SOLAR_ZENITH, SOLAR_ZENITH_CORRECTED,
};
use crate::core::terrain::TerrainGrids;
use crate::types::{AlbedoResult, MultiBandRaster};
use ndarray::{Array2, Zip};

/// Parameters for illumination correction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopographicParams {
    /// Bounds applied to cos θsc / cos θs
    pub factor_range: (f64, f64),
    /// How far a corrected cosine may leave [-1, 1] before the cell is dropped
    pub cosine_tolerance: f64,
}

impl Default for TopographicParams {
    fn default() -> Self {
        Self {
            factor_range: (0.2, 5.0),
            cosine_tolerance: 1e-9,
        }
    }
}

/// Terrain-corrected geometry of one cell
#[derive(Debug, Clone, Copy, PartialEq)]
struct CellGeometry {
    factor: f64,
    solar_zenith_deg: f64,
    sensor_zenith_deg: f64,
    valid: bool,
}

impl CellGeometry {
    const INVALID: CellGeometry = CellGeometry {
        factor: 0.0,
        solar_zenith_deg: 0.0,
        sensor_zenith_deg: 0.0,
        valid: false,
    };
}

/// Topographic (illumination) correction processor
#[derive(Debug, Clone)]
pub struct TopographicCorrector {
    params: TopographicParams,
}

impl TopographicCorrector {
    pub fn new(params: TopographicParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(TopographicParams::default())
    }

    pub fn params(&self) -> &TopographicParams {
        &self.params
    }

    /// Add `sur_refl_b0N_topo` for every reflectance band present and the
    /// corrected solar and sensor zenith angles (degrees).
    ///
    /// The six retrieval bands and the four angle bands are mandatory; band 6
    /// is corrected when supplied. Cells with the sun below the horizon or an
    /// out-of-domain corrected cosine are cleared in the mask.
    pub fn correct(
        &self,
        raster: &MultiBandRaster,
        terrain: &TerrainGrids,
    ) -> AlbedoResult<MultiBandRaster> {
        raster
            .geometry()
            .ensure_same(terrain.geometry(), "topographic correction")?;

        let solar_zenith = raster.require_band(SOLAR_ZENITH)?;
        let solar_azimuth = raster.require_band(SOLAR_AZIMUTH)?;
        let sensor_zenith = raster.require_band(SENSOR_ZENITH)?;
        let sensor_azimuth = raster.require_band(SENSOR_AZIMUTH)?;
        for band in BandId::RETRIEVAL {
            raster.require_band(&band.raw_name())?;
        }

        // (slope, aspect) pairs keep the zip within five producers
        let surface = Zip::from(terrain.slope_deg().data())
            .and(terrain.aspect_deg().data())
            .map_collect(|&slope, &aspect| (slope, aspect));

        let zip = Zip::from(solar_zenith)
            .and(solar_azimuth)
            .and(sensor_zenith)
            .and(sensor_azimuth)
            .and(&surface);
        let cell = |&sz: &f64, &sa: &f64, &vz: &f64, &va: &f64, &(slope, aspect): &(f64, f64)| {
            self.cell_geometry(sz, sa, vz, va, slope, aspect)
        };

        #[cfg(feature = "parallel")]
        let geometry = zip.par_map_collect(cell);
        #[cfg(not(feature = "parallel"))]
        let geometry = zip.map_collect(cell);

        let factor = geometry.mapv(|g| g.factor);
        let valid = geometry.mapv(|g| g.valid);

        log::debug!(
            "Topographic correction: {} of {} cells with valid illumination",
            valid.iter().filter(|&&v| v).count(),
            raster.geometry().cell_count()
        );

        let mut corrected = raster
            .clone()
            .with_band(SOLAR_ZENITH_CORRECTED, geometry.mapv(|g| g.solar_zenith_deg))?
            .with_band(SENSOR_ZENITH_CORRECTED, geometry.mapv(|g| g.sensor_zenith_deg))?;

        for band in BandId::ALL {
            let Some(raw) = raster.band(&band.raw_name()) else {
                continue;
            };
            corrected = corrected.with_band(band.topo_name(), apply_factor(raw, &factor))?;
        }

        corrected.restrict(&valid)
    }

    fn cell_geometry(
        &self,
        solar_zenith_raw: f64,
        solar_azimuth_raw: f64,
        sensor_zenith_raw: f64,
        sensor_azimuth_raw: f64,
        slope_deg: f64,
        aspect_deg: f64,
    ) -> CellGeometry {
        let theta_s = (solar_zenith_raw * ANGLE_SCALE).to_radians();
        let phi_s = (solar_azimuth_raw * ANGLE_SCALE).to_radians();
        let theta_v = (sensor_zenith_raw * ANGLE_SCALE).to_radians();
        let phi_v = (sensor_azimuth_raw * ANGLE_SCALE).to_radians();
        let slope = slope_deg.to_radians();
        let aspect = aspect_deg.to_radians();

        let inputs = [theta_s, phi_s, theta_v, phi_v, slope, aspect];
        if inputs.iter().any(|v| !v.is_finite()) {
            return CellGeometry::INVALID;
        }

        let cos_s = theta_s.cos();
        if cos_s <= 0.0 {
            return CellGeometry::INVALID;
        }

        let cos_sc = slope.cos() * cos_s + slope.sin() * theta_s.sin() * (aspect - phi_s).cos();
        let cos_vc =
            slope.cos() * theta_v.cos() + slope.sin() * theta_v.sin() * (aspect - phi_v).cos();

        let (Some(cos_sc), Some(cos_vc)) = (self.unit_cosine(cos_sc), self.unit_cosine(cos_vc))
        else {
            return CellGeometry::INVALID;
        };

        let (low, high) = self.params.factor_range;
        CellGeometry {
            factor: (cos_sc / cos_s).clamp(low, high),
            solar_zenith_deg: cos_sc.acos().to_degrees(),
            sensor_zenith_deg: cos_vc.acos().to_degrees(),
            valid: true,
        }
    }

    /// Clamp a cosine into [-1, 1] if it lies within tolerance of that range
    fn unit_cosine(&self, value: f64) -> Option<f64> {
        let tolerance = self.params.cosine_tolerance;
        if value.is_finite() && (-1.0 - tolerance..=1.0 + tolerance).contains(&value) {
            Some(value.clamp(-1.0, 1.0))
        } else {
            None
        }
    }
}

impl Default for TopographicCorrector {
    fn default() -> Self {
        Self::standard()
    }
}

/// Unscale a stored reflectance band and apply the correction factor
fn apply_factor(raw: &Array2<f64>, factor: &Array2<f64>) -> Array2<f64> {
    Zip::from(raw)
        .and(factor)
        .map_collect(|&r, &f| r * REFLECTANCE_SCALE * f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlbedoError, GeoTransform, Grid, GridGeometry};
    use approx::assert_abs_diff_eq;

    fn geometry() -> GridGeometry {
        GridGeometry::new(32611, GeoTransform::north_up(0.0, 0.0, 500.0), 2, 2)
    }

    fn observation(solar_zenith: f64, sensor_zenith: f64) -> MultiBandRaster {
        let filled = |v: f64| Array2::from_elem((2, 2), v);
        let mut raster = MultiBandRaster::new(geometry())
            .with_band(SOLAR_ZENITH, filled(solar_zenith / ANGLE_SCALE))
            .unwrap()
            .with_band(SOLAR_AZIMUTH, filled(15000.0))
            .unwrap()
            .with_band(SENSOR_ZENITH, filled(sensor_zenith / ANGLE_SCALE))
            .unwrap()
            .with_band(SENSOR_AZIMUTH, filled(9000.0))
            .unwrap();
        for band in BandId::RETRIEVAL {
            raster = raster.with_band(band.raw_name(), filled(5000.0)).unwrap();
        }
        raster
    }

    fn sloped(slope: f64, aspect: f64) -> TerrainGrids {
        TerrainGrids::new(Grid::filled(geometry(), slope), Grid::filled(geometry(), aspect)).unwrap()
    }

    #[test]
    fn test_flat_terrain_factor_is_one() {
        let corrector = TopographicCorrector::standard();
        let raster = observation(37.0, 12.0);
        let corrected = corrector.correct(&raster, &TerrainGrids::flat(geometry())).unwrap();

        let topo = corrected.band(&BandId::B1.topo_name()).unwrap();
        assert!(topo.iter().all(|&v| v == 5000.0 * REFLECTANCE_SCALE));
        assert_eq!(corrected.valid_count(), 4);
        let sza = corrected.band(SOLAR_ZENITH_CORRECTED).unwrap();
        assert_abs_diff_eq!(sza[[0, 0]], 37.0, epsilon = 1e-9);
        let vza = corrected.band(SENSOR_ZENITH_CORRECTED).unwrap();
        assert_abs_diff_eq!(vza[[1, 1]], 12.0, epsilon = 1e-9);
        // Raw bands are carried through
        assert!(corrected.has_band(&BandId::B7.raw_name()));
    }

    #[test]
    fn test_sun_facing_slope_brightens() {
        // Slope facing the sun (aspect = solar azimuth)
        let corrector = TopographicCorrector::standard();
        let raster = observation(60.0, 0.0);
        let corrected = corrector.correct(&raster, &sloped(30.0, 150.0)).unwrap();

        // cos(θs - slope) / cos θs = cos 30° / cos 60°
        let expected = 30f64.to_radians().cos() / 60f64.to_radians().cos();
        let topo = corrected.band(&BandId::B3.topo_name()).unwrap();
        assert_abs_diff_eq!(topo[[0, 1]], 0.5 * expected, epsilon = 1e-12);
        let sza = corrected.band(SOLAR_ZENITH_CORRECTED).unwrap();
        assert_abs_diff_eq!(sza[[0, 1]], 30.0, epsilon = 1e-9);
    }

    #[test]
    fn test_factor_is_clamped() {
        let corrector = TopographicCorrector::standard();
        // Slope facing away from a low sun: cos θsc < 0
        let raster = observation(80.0, 0.0);
        let corrected = corrector.correct(&raster, &sloped(45.0, 330.0)).unwrap();
        let topo = corrected.band(&BandId::B1.topo_name()).unwrap();
        assert_abs_diff_eq!(topo[[0, 0]], 0.5 * 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_sun_below_horizon_is_masked() {
        let corrector = TopographicCorrector::standard();
        let raster = observation(95.0, 0.0);
        let corrected = corrector.correct(&raster, &TerrainGrids::flat(geometry())).unwrap();
        assert_eq!(corrected.valid_count(), 0);
        let topo = corrected.band(&BandId::B1.topo_name()).unwrap();
        assert!(topo.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_missing_terrain_is_masked() {
        let corrector = TopographicCorrector::standard();
        let mut slope = Array2::zeros((2, 2));
        slope[[1, 0]] = f64::NAN;
        let terrain = TerrainGrids::new(
            Grid::new(geometry(), slope).unwrap(),
            Grid::filled(geometry(), 0.0),
        )
        .unwrap();
        let corrected = corrector.correct(&observation(30.0, 5.0), &terrain).unwrap();
        assert!(!corrected.mask()[[1, 0]]);
        assert_eq!(corrected.valid_count(), 3);
    }

    #[test]
    fn test_band6_corrected_when_present() {
        let corrector = TopographicCorrector::standard();
        let raster = observation(30.0, 5.0)
            .with_band(BandId::B6.raw_name(), Array2::from_elem((2, 2), 1200.0))
            .unwrap();
        let corrected = corrector.correct(&raster, &TerrainGrids::flat(geometry())).unwrap();
        assert!(corrected.has_band(&BandId::B6.topo_name()));
    }

    #[test]
    fn test_missing_angle_band_is_recoverable() {
        let corrector = TopographicCorrector::standard();
        let raster = MultiBandRaster::new(geometry());
        let err = corrector
            .correct(&raster, &TerrainGrids::flat(geometry()))
            .unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_terrain_must_be_coregistered() {
        let corrector = TopographicCorrector::standard();
        let other = GridGeometry::new(32611, GeoTransform::north_up(0.0, 0.0, 250.0), 2, 2);
        let result = corrector.correct(&observation(30.0, 5.0), &TerrainGrids::flat(other));
        assert!(matches!(result, Err(AlbedoError::InvalidGeometry(_))));
    }
}
