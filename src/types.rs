use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square cells
    pub fn north_up(top_left_x: f64, top_left_y: f64, cell_size: f64) -> Self {
        Self {
            top_left_x,
            pixel_width: cell_size,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -cell_size,
        }
    }

    /// Map coordinates of a fractional (column, row) position
    pub fn pixel_to_map(&self, col: f64, row: f64) -> (f64, f64) {
        let x = self.top_left_x + col * self.pixel_width + row * self.rotation_x;
        let y = self.top_left_y + col * self.rotation_y + row * self.pixel_height;
        (x, y)
    }

    /// Fractional (column, row) position of a map coordinate.
    ///
    /// Returns `None` for a singular transform.
    pub fn map_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det;
        Some((col, row))
    }
}

/// Projection, origin, cell size and shape of a grid.
///
/// Two grids are co-registered iff their geometries compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridGeometry {
    pub epsg: u32,
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
}

impl GridGeometry {
    pub fn new(epsg: u32, transform: GeoTransform, rows: usize, cols: usize) -> Self {
        Self { epsg, transform, rows, cols }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    pub fn cell_count(&self) -> usize {
        self.rows * self.cols
    }

    /// Map coordinates of the centre of a cell
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.transform.pixel_to_map(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Axis-aligned map extent of a cell as (min_x, min_y, max_x, max_y)
    pub fn cell_bounds(&self, row: usize, col: usize) -> (f64, f64, f64, f64) {
        let corners = [
            self.transform.pixel_to_map(col as f64, row as f64),
            self.transform.pixel_to_map(col as f64 + 1.0, row as f64),
            self.transform.pixel_to_map(col as f64, row as f64 + 1.0),
            self.transform.pixel_to_map(col as f64 + 1.0, row as f64 + 1.0),
        ];
        corners.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(min_x, min_y, max_x, max_y), &(x, y)| {
                (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
            },
        )
    }

    /// Fail unless `other` describes the same grid
    pub fn ensure_same(&self, other: &GridGeometry, context: &str) -> AlbedoResult<()> {
        if self != other {
            return Err(AlbedoError::InvalidGeometry(format!(
                "{}: grids are not co-registered ({:?} vs {:?})",
                context, self, other
            )));
        }
        Ok(())
    }

    /// Fail unless `data` has this geometry's shape
    pub fn ensure_shape<T>(&self, data: &Array2<T>, context: &str) -> AlbedoResult<()> {
        if data.dim() != self.shape() {
            return Err(AlbedoError::InvalidGeometry(format!(
                "{}: array shape {:?} does not match grid shape {:?}",
                context,
                data.dim(),
                self.shape()
            )));
        }
        Ok(())
    }
}

/// A single-band grid with its geometry
#[derive(Debug, Clone, PartialEq)]
pub struct Grid<T> {
    geometry: GridGeometry,
    data: Array2<T>,
}

impl<T> Grid<T> {
    pub fn new(geometry: GridGeometry, data: Array2<T>) -> AlbedoResult<Self> {
        geometry.ensure_shape(&data, "Grid::new")?;
        Ok(Self { geometry, data })
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn data(&self) -> &Array2<T> {
        &self.data
    }

    pub fn into_data(self) -> Array2<T> {
        self.data
    }
}

impl<T: Clone> Grid<T> {
    /// Grid with every cell set to `value`
    pub fn filled(geometry: GridGeometry, value: T) -> Self {
        Self {
            data: Array2::from_elem(geometry.shape(), value),
            geometry,
        }
    }
}

/// Per-cell validity; `false` means "no data" for every consumer
pub type ValidityMask = Grid<bool>;

impl Grid<bool> {
    pub fn count_valid(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Conjunction of two co-registered masks
    pub fn and(&self, other: &ValidityMask) -> AlbedoResult<ValidityMask> {
        self.geometry.ensure_same(&other.geometry, "ValidityMask::and")?;
        let data = Zip::from(&self.data)
            .and(&other.data)
            .map_collect(|&a, &b| a && b);
        Ok(Self { geometry: self.geometry, data })
    }
}

/// Co-registered named bands sharing one validity mask.
///
/// Builder methods consume the raster and return a new one; a cleared mask
/// cell can never become valid again.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiBandRaster {
    geometry: GridGeometry,
    bands: BTreeMap<String, Array2<f64>>,
    mask: Array2<bool>,
}

impl MultiBandRaster {
    /// Empty raster with every cell valid
    pub fn new(geometry: GridGeometry) -> Self {
        Self {
            mask: Array2::from_elem(geometry.shape(), true),
            bands: BTreeMap::new(),
            geometry,
        }
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    /// Add or replace a band
    pub fn with_band(mut self, name: impl Into<String>, data: Array2<f64>) -> AlbedoResult<Self> {
        let name = name.into();
        self.geometry.ensure_shape(&data, &format!("band '{}'", name))?;
        self.bands.insert(name, data);
        Ok(self)
    }

    /// Add a band from a grid, which must be co-registered
    pub fn with_grid(self, name: impl Into<String>, grid: &Grid<f64>) -> AlbedoResult<Self> {
        let name = name.into();
        self.geometry
            .ensure_same(grid.geometry(), &format!("band '{}'", name))?;
        self.with_band(name, grid.data().clone())
    }

    pub fn band(&self, name: &str) -> Option<&Array2<f64>> {
        self.bands.get(name)
    }

    /// Band lookup that reports a recoverable missing-band error
    pub fn require_band(&self, name: &str) -> AlbedoResult<&Array2<f64>> {
        self.bands.get(name).ok_or_else(|| AlbedoError::MissingBand {
            band: name.to_string(),
        })
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.bands.contains_key(name)
    }

    pub fn band_names(&self) -> impl Iterator<Item = &str> {
        self.bands.keys().map(String::as_str)
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn mask(&self) -> &Array2<bool> {
        &self.mask
    }

    pub fn validity(&self) -> ValidityMask {
        ValidityMask {
            geometry: self.geometry,
            data: self.mask.clone(),
        }
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&v| v).count()
    }

    /// AND an array mask into the raster mask
    pub fn restrict(mut self, mask: &Array2<bool>) -> AlbedoResult<Self> {
        self.geometry.ensure_shape(mask, "MultiBandRaster::restrict")?;
        Zip::from(&mut self.mask)
            .and(mask)
            .for_each(|current, &other| *current = *current && other);
        Ok(self)
    }

    /// AND a co-registered validity mask into the raster mask
    pub fn restrict_with(self, mask: &ValidityMask) -> AlbedoResult<Self> {
        self.geometry
            .ensure_same(mask.geometry(), "MultiBandRaster::restrict_with")?;
        self.restrict(mask.data())
    }

    /// Union of bands and conjunction of masks of two co-registered rasters.
    ///
    /// Bands of `other` replace same-named bands of `self`.
    pub fn merge(mut self, other: MultiBandRaster) -> AlbedoResult<Self> {
        self.geometry
            .ensure_same(&other.geometry, "MultiBandRaster::merge")?;
        let MultiBandRaster { bands, mask, .. } = other;
        self.bands.extend(bands);
        self.restrict(&mask)
    }

    /// New raster holding only the named bands (same mask)
    pub fn select(&self, names: &[&str]) -> AlbedoResult<Self> {
        let mut bands = BTreeMap::new();
        for &name in names {
            bands.insert(name.to_string(), self.require_band(name)?.clone());
        }
        Ok(Self {
            geometry: self.geometry,
            bands,
            mask: self.mask.clone(),
        })
    }

    /// Values of a band at valid cells, row-major
    pub fn valid_values(&self, name: &str) -> AlbedoResult<Vec<f64>> {
        let band = self.require_band(name)?;
        Ok(Zip::from(band)
            .and(&self.mask)
            .fold(Vec::new(), |mut acc, &value, &valid| {
                if valid {
                    acc.push(value);
                }
                acc
            }))
    }
}

/// MODIS platform carrying the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Terra,
    Aqua,
}

impl Platform {
    /// Product-name prefix used by the platform's collections
    pub fn product_prefix(&self) -> &'static str {
        match self {
            Platform::Terra => "MOD",
            Platform::Aqua => "MYD",
        }
    }

    pub fn from_product_prefix(prefix: &str) -> Option<Self> {
        match prefix.to_ascii_uppercase().as_str() {
            "MOD" => Some(Platform::Terra),
            "MYD" => Some(Platform::Aqua),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Terra => write!(f, "Terra"),
            Platform::Aqua => write!(f, "Aqua"),
        }
    }
}

/// Glacier surface class selecting the BRDF model and broadband equation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceClass {
    Snow,
    Ice,
}

impl fmt::Display for SurfaceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceClass::Snow => write!(f, "snow"),
            SurfaceClass::Ice => write!(f, "ice"),
        }
    }
}

/// One time-stamped acquisition
#[derive(Debug, Clone)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub platform: Platform,
    pub product_id: Option<String>,
    pub raster: MultiBandRaster,
}

impl Observation {
    pub fn new(timestamp: DateTime<Utc>, platform: Platform, raster: MultiBandRaster) -> Self {
        Self {
            timestamp,
            platform,
            product_id: None,
            raster,
        }
    }

    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }
}

/// Observations of one source, kept in acquisition order
#[derive(Debug, Clone, Default)]
pub struct RasterTimeSeries {
    observations: Vec<Observation>,
}

impl RasterTimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_observations(observations: Vec<Observation>) -> AlbedoResult<Self> {
        let mut series = Self::new();
        for observation in observations {
            series.push(observation)?;
        }
        Ok(series)
    }

    /// Insert keeping timestamp order; equal timestamps keep insertion order
    pub fn push(&mut self, observation: Observation) -> AlbedoResult<()> {
        if let Some(first) = self.observations.first() {
            let expected = first.raster.geometry().epsg;
            let found = observation.raster.geometry().epsg;
            if expected != found {
                return Err(AlbedoError::InvalidGeometry(format!(
                    "time series projection EPSG:{} does not match observation EPSG:{}",
                    expected, found
                )));
            }
        }
        let index = self
            .observations
            .partition_point(|existing| existing.timestamp <= observation.timestamp);
        self.observations.insert(index, observation);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }
}

/// Error types for albedo retrieval
#[derive(Debug, thiserror::Error)]
pub enum AlbedoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing band: {band}")]
    MissingBand { band: String },

    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("No BRDF coefficient table for surface class '{0}'")]
    MissingCoefficientTable(SurfaceClass),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid glacier polygon: {0}")]
    InvalidPolygon(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

impl AlbedoError {
    /// Whether the observation can simply be skipped
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AlbedoError::MissingBand { .. })
    }
}

/// Result type for albedo operations
pub type AlbedoResult<T> = Result<T, AlbedoError>;
