//! glacier-albedo: glacier surface albedo from MODIS daily surface reflectance
//!
//! Implements the Ren et al. retrieval: quality filtering, topographic
//! correction of illumination and viewing geometry, NDSI snow/ice
//! classification, class-specific BRDF anisotropy correction and
//! narrow-to-broadband conversion, restricted to a glacier outline.
//! Observations are processed independently and assembled into a
//! time-ordered series with one record per timestamp.

pub mod types;
pub mod bands;
pub mod config;
pub mod core;
pub mod io;

// Re-export main types and functions for easier access
pub use types::{
    AlbedoError, AlbedoResult, GeoTransform, Grid, GridGeometry, MultiBandRaster, Observation,
    Platform, RasterTimeSeries, SurfaceClass, ValidityMask,
};
pub use bands::BandId;
pub use config::{MeltSeason, QaSelection, RetrievalConfig};
pub use crate::core::{AlbedoRetrieval, GlacierMaskCache, GlacierPolygon, RetrievedAlbedo, SeriesOutcome, TerrainGrids};
pub use io::{parse_glacier_polygon, read_glacier_polygon};
