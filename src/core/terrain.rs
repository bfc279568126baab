use crate::types::{AlbedoError, AlbedoResult, Grid, GridGeometry};
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Metres per degree of latitude, used when the DEM is in geographic coordinates
const METERS_PER_DEGREE: f64 = 111_320.0;
const EPSG_WGS84: u32 = 4326;

/// Static slope and aspect of one area of interest, co-registered with the
/// working grid. Angles are in degrees; aspect is clockwise from north and
/// points downslope.
#[derive(Debug, Clone, PartialEq)]
pub struct TerrainGrids {
    slope_deg: Grid<f64>,
    aspect_deg: Grid<f64>,
}

impl TerrainGrids {
    pub fn new(slope_deg: Grid<f64>, aspect_deg: Grid<f64>) -> AlbedoResult<Self> {
        slope_deg
            .geometry()
            .ensure_same(aspect_deg.geometry(), "TerrainGrids::new")?;
        Ok(Self { slope_deg, aspect_deg })
    }

    /// Horizontal terrain everywhere
    pub fn flat(geometry: GridGeometry) -> Self {
        Self {
            slope_deg: Grid::filled(geometry, 0.0),
            aspect_deg: Grid::filled(geometry, 0.0),
        }
    }

    /// Derive slope and aspect from an elevation grid using central differences
    pub fn from_dem(dem: &Grid<f64>) -> AlbedoResult<Self> {
        let geometry = *dem.geometry();
        let elevation = dem.data();
        let (height, width) = elevation.dim();

        if height < 3 || width < 3 {
            return Err(AlbedoError::Processing(
                "DEM too small for slope computation".to_string(),
            ));
        }

        log::debug!("Calculating slope and aspect from {}x{} DEM", height, width);

        let (dx, dy) = signed_spacing_m(&geometry);
        let mut slope = Array2::zeros((height, width));
        let mut aspect = Array2::zeros((height, width));

        for i in 1..height - 1 {
            for j in 1..width - 1 {
                // Gradient towards map east / map north
                let dz_dx = (elevation[[i, j + 1]] - elevation[[i, j - 1]]) / (2.0 * dx);
                let dz_dy = (elevation[[i + 1, j]] - elevation[[i - 1, j]]) / (2.0 * dy);
                let (s, a) = slope_aspect_deg(dz_dx, dz_dy);
                slope[[i, j]] = s;
                aspect[[i, j]] = a;
            }
        }

        fill_edge_values(&mut slope);
        fill_edge_values(&mut aspect);

        Ok(Self {
            slope_deg: Grid::new(geometry, slope)?,
            aspect_deg: Grid::new(geometry, aspect)?,
        })
    }

    pub fn geometry(&self) -> &GridGeometry {
        self.slope_deg.geometry()
    }

    pub fn slope_deg(&self) -> &Grid<f64> {
        &self.slope_deg
    }

    pub fn aspect_deg(&self) -> &Grid<f64> {
        &self.aspect_deg
    }
}

/// Slope and downslope aspect (degrees) from east/north gradients
fn slope_aspect_deg(dz_dx: f64, dz_dy: f64) -> (f64, f64) {
    let magnitude = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt();
    if !magnitude.is_finite() {
        return (f64::NAN, f64::NAN);
    }
    let slope = magnitude.atan().to_degrees();
    if magnitude == 0.0 {
        return (slope, 0.0);
    }
    let aspect = (-dz_dx).atan2(-dz_dy).to_degrees().rem_euclid(360.0);
    (slope, if aspect >= 360.0 { 0.0 } else { aspect })
}

/// Cell spacing in metres along map x and y, keeping the transform's sign
fn signed_spacing_m(geometry: &GridGeometry) -> (f64, f64) {
    let transform = &geometry.transform;
    if geometry.epsg != EPSG_WGS84 {
        return (transform.pixel_width, transform.pixel_height);
    }
    let (_, lat) = geometry.cell_center(geometry.rows / 2, geometry.cols / 2);
    (
        transform.pixel_width * METERS_PER_DEGREE * lat.to_radians().cos(),
        transform.pixel_height * METERS_PER_DEGREE,
    )
}

/// Fill edge values by copying from nearest interior pixels
fn fill_edge_values(array: &mut Array2<f64>) {
    let (height, width) = array.dim();

    for j in 0..width {
        array[[0, j]] = array[[1, j]];
        array[[height - 1, j]] = array[[height - 2, j]];
    }

    for i in 0..height {
        array[[i, 0]] = array[[i, 1]];
        array[[i, width - 1]] = array[[i, width - 2]];
    }
}

/// Resample a grid onto another grid of the same projection using bilinear
/// interpolation between cell centres. Cells outside the source are NaN.
pub fn resample_bilinear(source: &Grid<f64>, target: &GridGeometry) -> AlbedoResult<Grid<f64>> {
    let source_geometry = source.geometry();
    if source_geometry.epsg != target.epsg {
        return Err(AlbedoError::InvalidGeometry(format!(
            "cannot resample EPSG:{} onto EPSG:{} without reprojection",
            source_geometry.epsg, target.epsg
        )));
    }
    if source_geometry == target {
        return Ok(source.clone());
    }

    log::debug!("Resampling grid to target shape {:?}", target.shape());

    let data = source.data();
    let (source_height, source_width) = data.dim();
    let mut resampled = Array2::from_elem(target.shape(), f64::NAN);

    for i in 0..target.rows {
        for j in 0..target.cols {
            let (x, y) = target.cell_center(i, j);
            let Some((col, row)) = source_geometry.transform.map_to_pixel(x, y) else {
                continue;
            };
            // Index space of source cell centres
            let source_col = col - 0.5;
            let source_row = row - 0.5;

            if source_col < 0.0
                || source_row < 0.0
                || source_col > (source_width - 1) as f64
                || source_row > (source_height - 1) as f64
            {
                continue;
            }

            let x1 = source_col.floor() as usize;
            let y1 = source_row.floor() as usize;
            let x2 = (x1 + 1).min(source_width - 1);
            let y2 = (y1 + 1).min(source_height - 1);
            let dx = source_col - x1 as f64;
            let dy = source_row - y1 as f64;

            let taps = [
                (data[[y1, x1]], (1.0 - dx) * (1.0 - dy)),
                (data[[y1, x2]], dx * (1.0 - dy)),
                (data[[y2, x1]], (1.0 - dx) * dy),
                (data[[y2, x2]], dx * dy),
            ];
            resampled[[i, j]] = taps
                .iter()
                .filter(|(_, weight)| *weight > 0.0)
                .map(|(value, weight)| value * weight)
                .sum();
        }
    }

    Grid::new(*target, resampled)
}

/// Terrain grids computed once per area of interest for the lifetime of a run
#[derive(Debug, Default)]
pub struct TerrainCache {
    entries: Mutex<HashMap<String, Arc<TerrainGrids>>>,
}

impl TerrainCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached grids for `key`, computing them on first use
    pub fn get_or_compute<F>(&self, key: &str, compute: F) -> AlbedoResult<Arc<TerrainGrids>>
    where
        F: FnOnce() -> AlbedoResult<TerrainGrids>,
    {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AlbedoError::Processing("terrain cache lock poisoned".to_string()))?;
        if let Some(existing) = entries.get(key) {
            return Ok(Arc::clone(existing));
        }
        log::info!("Computing terrain grids for area '{}'", key);
        let grids = Arc::new(compute()?);
        entries.insert(key.to_string(), Arc::clone(&grids));
        Ok(grids)
    }

    pub fn get(&self, key: &str) -> Option<Arc<TerrainGrids>> {
        self.entries
            .lock()
            .ok()
            .and_then(|entries| entries.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use approx::assert_abs_diff_eq;

    fn geometry(rows: usize, cols: usize, cell: f64) -> GridGeometry {
        GridGeometry::new(32611, GeoTransform::north_up(0.0, 1000.0, cell), rows, cols)
    }

    fn dem_from(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f64) -> Grid<f64> {
        Grid::new(geometry(rows, cols, 10.0), Array2::from_shape_fn((rows, cols), |(i, j)| f(i, j)))
            .unwrap()
    }

    #[test]
    fn test_flat_dem_has_zero_slope() {
        let terrain = TerrainGrids::from_dem(&dem_from(5, 5, |_, _| 1500.0)).unwrap();
        assert!(terrain.slope_deg().data().iter().all(|&s| s == 0.0));
        assert!(terrain.aspect_deg().data().iter().all(|&a| a == 0.0));
    }

    #[test]
    fn test_east_rising_plane_faces_west() {
        // 10 m per 10 m cell => 45 degrees
        let terrain = TerrainGrids::from_dem(&dem_from(5, 5, |_, j| j as f64 * 10.0)).unwrap();
        assert_abs_diff_eq!(terrain.slope_deg().data()[[2, 2]], 45.0, epsilon = 1e-9);
        assert_abs_diff_eq!(terrain.aspect_deg().data()[[2, 2]], 270.0, epsilon = 1e-9);
        // Edges copied from the interior
        assert_abs_diff_eq!(terrain.slope_deg().data()[[0, 0]], 45.0, epsilon = 1e-9);
    }

    #[test]
    fn test_north_rising_plane_faces_south() {
        // Row index grows southwards, so elevation falls with the row index
        let terrain = TerrainGrids::from_dem(&dem_from(5, 5, |i, _| 100.0 - i as f64 * 5.0)).unwrap();
        assert_abs_diff_eq!(terrain.aspect_deg().data()[[2, 2]], 180.0, epsilon = 1e-9);
        assert!(terrain.slope_deg().data()[[2, 2]] > 0.0);
    }

    #[test]
    fn test_small_dem_is_rejected() {
        assert!(TerrainGrids::from_dem(&dem_from(2, 5, |_, _| 0.0)).is_err());
    }

    #[test]
    fn test_resample_identity_and_downsample() {
        let dem = dem_from(4, 4, |i, j| (i * 4 + j) as f64);
        let same = resample_bilinear(&dem, dem.geometry()).unwrap();
        assert_eq!(same, dem);

        // 2x2 grid of 20 m cells over the same extent: centres fall between
        // four source centres
        let coarse = geometry(2, 2, 20.0);
        let resampled = resample_bilinear(&dem, &coarse).unwrap();
        assert_abs_diff_eq!(resampled.data()[[0, 0]], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(resampled.data()[[1, 1]], 12.5, epsilon = 1e-12);
    }

    #[test]
    fn test_resample_outside_is_nan() {
        let dem = dem_from(3, 3, |_, _| 7.0);
        let shifted = GridGeometry::new(32611, GeoTransform::north_up(1000.0, 1000.0, 10.0), 1, 1);
        let resampled = resample_bilinear(&dem, &shifted).unwrap();
        assert!(resampled.data()[[0, 0]].is_nan());
    }

    #[test]
    fn test_resample_rejects_other_projection() {
        let dem = dem_from(3, 3, |_, _| 7.0);
        let mut other = *dem.geometry();
        other.epsg = 4326;
        assert!(resample_bilinear(&dem, &other).is_err());
    }

    #[test]
    fn test_cache_computes_once() {
        let cache = TerrainCache::new();
        let geom = geometry(2, 2, 500.0);
        let mut calls = 0;
        let first = cache
            .get_or_compute("saskatchewan", || {
                calls += 1;
                Ok(TerrainGrids::flat(geom))
            })
            .unwrap();
        let second = cache
            .get_or_compute("saskatchewan", || Err(AlbedoError::Processing("recomputed".into())))
            .unwrap();
        assert_eq!(calls, 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("athabasca").is_none());
    }
}
