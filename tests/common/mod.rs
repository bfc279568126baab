//! Synthetic MODIS scenes shared by the integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use glacier_albedo::bands::{
    BandId, SENSOR_AZIMUTH, SENSOR_ZENITH, SOLAR_AZIMUTH, SOLAR_ZENITH, STATE_QA,
};
use glacier_albedo::core::{GlacierMask, GlacierMaskBuilder, GlacierPolygon};
use glacier_albedo::{GeoTransform, GridGeometry, MultiBandRaster, Observation, Platform, TerrainGrids};
use ndarray::Array2;
use std::sync::Arc;

/// Clear sky, snow/ice confidence 3
pub const CLEAR_QA: f64 = 12288.0;
/// Cloud state 1 on top of `CLEAR_QA`
pub const CLOUDY_QA: f64 = 12289.0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 2x2 grid of 500 m cells covering x 0..1000, y 0..1000
pub fn geometry() -> GridGeometry {
    GridGeometry::new(32611, GeoTransform::north_up(0.0, 1000.0, 500.0), 2, 2)
}

pub fn july(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 7, day, hour, 0, 0).unwrap()
}

/// Raw-scaled scene: solar zenith 30°, sensor zenith 10°, zero azimuths,
/// every reflectance band at `green` except the SWIR bands at `swir`
pub struct Scene {
    pub green: f64,
    pub swir: f64,
    pub qa: f64,
    pub skip_band: Option<String>,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            green: 5000.0,
            swir: 1000.0,
            qa: CLEAR_QA,
            skip_band: None,
        }
    }
}

impl Scene {
    pub fn without(mut self, band: impl Into<String>) -> Self {
        self.skip_band = Some(band.into());
        self
    }

    pub fn raster(&self) -> MultiBandRaster {
        let filled = |v: f64| Array2::from_elem((2, 2), v);
        let mut bands: Vec<(String, Array2<f64>)> = vec![
            (SOLAR_ZENITH.to_string(), filled(3000.0)),
            (SOLAR_AZIMUTH.to_string(), filled(0.0)),
            (SENSOR_ZENITH.to_string(), filled(1000.0)),
            (SENSOR_AZIMUTH.to_string(), filled(0.0)),
            (STATE_QA.to_string(), filled(self.qa)),
        ];
        for band in BandId::ALL {
            let value = match band {
                BandId::B6 | BandId::B7 => self.swir,
                _ => self.green,
            };
            bands.push((band.raw_name(), filled(value)));
        }

        let mut raster = MultiBandRaster::new(geometry());
        for (name, data) in bands {
            if self.skip_band.as_deref() == Some(name.as_str()) {
                continue;
            }
            raster = raster.with_band(name, data).unwrap();
        }
        raster
    }

    pub fn observation(&self, timestamp: DateTime<Utc>, platform: Platform) -> Observation {
        Observation::new(timestamp, platform, self.raster())
    }
}

pub fn flat_terrain() -> Arc<TerrainGrids> {
    Arc::new(TerrainGrids::flat(geometry()))
}

pub fn square(min: f64, max: f64) -> GlacierPolygon {
    GlacierPolygon::from_exterior(vec![
        [min, min],
        [max, min],
        [max, max],
        [min, max],
        [min, min],
    ])
    .unwrap()
}

/// Glacier covering the whole grid
pub fn full_glacier() -> Arc<GlacierMask> {
    Arc::new(
        GlacierMaskBuilder::standard()
            .build(&square(-10.0, 1010.0), &geometry())
            .unwrap(),
    )
}
