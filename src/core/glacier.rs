use crate::bands::GLACIER_FRACTION;
use crate::types::{
    AlbedoError, AlbedoResult, Grid, GridGeometry, MultiBandRaster, ValidityMask,
};
use ndarray::Array2;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::sync::{Arc, Mutex};

/// One polygon: exterior ring plus holes, in map coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonRings {
    pub exterior: Vec<[f64; 2]>,
    pub holes: Vec<Vec<[f64; 2]>>,
}

impl PolygonRings {
    pub fn new(exterior: Vec<[f64; 2]>, holes: Vec<Vec<[f64; 2]>>) -> Self {
        Self { exterior, holes }
    }

    /// Inside the exterior and outside every hole
    pub fn contains(&self, x: f64, y: f64) -> bool {
        ring_contains(&self.exterior, x, y) && !self.holes.iter().any(|h| ring_contains(h, x, y))
    }
}

/// Static glacier outline (multipolygon) in the working grid's projection
#[derive(Debug, Clone, PartialEq)]
pub struct GlacierPolygon {
    polygons: Vec<PolygonRings>,
    bounds: (f64, f64, f64, f64),
}

impl GlacierPolygon {
    pub fn new(polygons: Vec<PolygonRings>) -> AlbedoResult<Self> {
        if polygons.is_empty() {
            return Err(AlbedoError::InvalidPolygon("no polygons given".to_string()));
        }
        for polygon in &polygons {
            validate_ring(&polygon.exterior, "exterior")?;
            for hole in &polygon.holes {
                validate_ring(hole, "hole")?;
            }
        }

        let bounds = polygons
            .iter()
            .flat_map(|p| p.exterior.iter())
            .fold(
                (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
                |(min_x, min_y, max_x, max_y), &[x, y]| {
                    (min_x.min(x), min_y.min(y), max_x.max(x), max_y.max(y))
                },
            );

        Ok(Self { polygons, bounds })
    }

    /// Single polygon without holes
    pub fn from_exterior(exterior: Vec<[f64; 2]>) -> AlbedoResult<Self> {
        Self::new(vec![PolygonRings::new(exterior, Vec::new())])
    }

    pub fn polygons(&self) -> &[PolygonRings] {
        &self.polygons
    }

    /// (min_x, min_y, max_x, max_y)
    pub fn bounding_box(&self) -> (f64, f64, f64, f64) {
        self.bounds
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (min_x, min_y, max_x, max_y) = self.bounds;
        if x < min_x || x > max_x || y < min_y || y > max_y {
            return false;
        }
        self.polygons.iter().any(|p| p.contains(x, y))
    }

    /// Whether an axis-aligned extent touches the bounding box
    pub fn bbox_intersects(&self, extent: (f64, f64, f64, f64)) -> bool {
        let (min_x, min_y, max_x, max_y) = self.bounds;
        let (e_min_x, e_min_y, e_max_x, e_max_y) = extent;
        e_min_x <= max_x && e_max_x >= min_x && e_min_y <= max_y && e_max_y >= min_y
    }
}

fn validate_ring(ring: &[[f64; 2]], kind: &str) -> AlbedoResult<()> {
    if ring.iter().flatten().any(|v| !v.is_finite()) {
        return Err(AlbedoError::InvalidPolygon(format!(
            "{} ring has non-finite coordinates",
            kind
        )));
    }
    let mut distinct: Vec<[f64; 2]> = Vec::with_capacity(ring.len());
    for &point in ring {
        if !distinct.contains(&point) {
            distinct.push(point);
        }
    }
    if distinct.len() < 3 {
        return Err(AlbedoError::InvalidPolygon(format!(
            "{} ring needs at least 3 distinct vertices, got {}",
            kind,
            distinct.len()
        )));
    }
    Ok(())
}

/// Even-odd crossing test; closed and open rings both work
fn ring_contains(ring: &[[f64; 2]], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Parameters for glacier mask construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlacierMaskParams {
    /// Minimum coverage fraction to keep a cell
    pub threshold: f64,
    /// Sub-cells per working cell edge
    pub supersampling: usize,
}

impl Default for GlacierMaskParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            supersampling: 16,
        }
    }
}

/// Coverage fraction and thresholded mask on one working grid
#[derive(Debug, Clone, PartialEq)]
pub struct GlacierMask {
    fraction: Grid<f64>,
    mask: ValidityMask,
    params: GlacierMaskParams,
}

impl GlacierMask {
    pub fn geometry(&self) -> &GridGeometry {
        self.fraction.geometry()
    }

    pub fn fraction(&self) -> &Grid<f64> {
        &self.fraction
    }

    pub fn mask(&self) -> &ValidityMask {
        &self.mask
    }

    pub fn params(&self) -> &GlacierMaskParams {
        &self.params
    }

    pub fn glacier_cells(&self) -> usize {
        self.mask.count_valid()
    }

    /// Add `glacier_fraction` and clear cells outside the glacier
    pub fn apply(&self, raster: MultiBandRaster) -> AlbedoResult<MultiBandRaster> {
        raster
            .with_grid(GLACIER_FRACTION, &self.fraction)?
            .restrict_with(&self.mask)
    }
}

/// Glacier mask builder
#[derive(Debug, Clone)]
pub struct GlacierMaskBuilder {
    params: GlacierMaskParams,
}

impl GlacierMaskBuilder {
    pub fn new(params: GlacierMaskParams) -> AlbedoResult<Self> {
        if !(params.threshold > 0.0 && params.threshold <= 1.0) {
            return Err(AlbedoError::Config(format!(
                "glacier fraction threshold must be in (0, 1], got {}",
                params.threshold
            )));
        }
        if params.supersampling == 0 {
            return Err(AlbedoError::Config(
                "glacier supersampling must be at least 1".to_string(),
            ));
        }
        Ok(Self { params })
    }

    pub fn standard() -> Self {
        Self {
            params: GlacierMaskParams::default(),
        }
    }

    pub fn params(&self) -> &GlacierMaskParams {
        &self.params
    }

    /// Fraction of each cell inside the polygon, from the mean over an
    /// `n x n` lattice of sub-cell centres
    pub fn fraction(&self, polygon: &GlacierPolygon, geometry: &GridGeometry) -> AlbedoResult<Grid<f64>> {
        let n = self.params.supersampling;
        let (rows, cols) = geometry.shape();
        log::debug!(
            "Rasterizing glacier outline at {}x{} sub-cells over {}x{} grid",
            n,
            n,
            rows,
            cols
        );

        let cell_fraction = |index: usize| -> f64 {
            let (row, col) = (index / cols, index % cols);
            if !polygon.bbox_intersects(geometry.cell_bounds(row, col)) {
                return 0.0;
            }
            let mut inside = 0usize;
            for sub_row in 0..n {
                let y_offset = (sub_row as f64 + 0.5) / n as f64;
                for sub_col in 0..n {
                    let x_offset = (sub_col as f64 + 0.5) / n as f64;
                    let (x, y) = geometry
                        .transform
                        .pixel_to_map(col as f64 + x_offset, row as f64 + y_offset);
                    inside += usize::from(polygon.contains(x, y));
                }
            }
            inside as f64 / (n * n) as f64
        };

        #[cfg(feature = "parallel")]
        let values: Vec<f64> = (0..rows * cols).into_par_iter().map(cell_fraction).collect();
        #[cfg(not(feature = "parallel"))]
        let values: Vec<f64> = (0..rows * cols).map(cell_fraction).collect();

        let data = Array2::from_shape_vec((rows, cols), values)
            .map_err(|e| AlbedoError::Processing(format!("glacier fraction grid: {}", e)))?;
        Grid::new(*geometry, data)
    }

    /// Fraction grid and mask (`fraction >= threshold` within the polygon
    /// bounding box)
    pub fn build(&self, polygon: &GlacierPolygon, geometry: &GridGeometry) -> AlbedoResult<GlacierMask> {
        let fraction = self.fraction(polygon, geometry)?;
        let threshold = self.params.threshold;
        let mask = Array2::from_shape_fn(geometry.shape(), |(row, col)| {
            fraction.data()[[row, col]] >= threshold
                && polygon.bbox_intersects(geometry.cell_bounds(row, col))
        });
        let mask = Grid::new(*geometry, mask)?;
        log::info!(
            "Glacier mask: {} of {} cells at threshold {:.2}",
            mask.count_valid(),
            geometry.cell_count(),
            threshold
        );
        Ok(GlacierMask {
            fraction,
            mask,
            params: self.params,
        })
    }
}

impl Default for GlacierMaskBuilder {
    fn default() -> Self {
        Self::standard()
    }
}

/// Glacier masks of one outline, built once per (grid, threshold, supersampling)
#[derive(Debug)]
pub struct GlacierMaskCache {
    polygon: Arc<GlacierPolygon>,
    entries: Mutex<Vec<Arc<GlacierMask>>>,
}

impl GlacierMaskCache {
    pub fn new(polygon: Arc<GlacierPolygon>) -> Self {
        Self {
            polygon,
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn polygon(&self) -> &GlacierPolygon {
        &self.polygon
    }

    pub fn get_or_build(
        &self,
        geometry: &GridGeometry,
        params: GlacierMaskParams,
    ) -> AlbedoResult<Arc<GlacierMask>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| AlbedoError::Processing("glacier mask cache lock poisoned".to_string()))?;
        if let Some(existing) = entries
            .iter()
            .find(|m| m.geometry() == geometry && *m.params() == params)
        {
            return Ok(Arc::clone(existing));
        }
        let mask = Arc::new(GlacierMaskBuilder::new(params)?.build(&self.polygon, geometry)?);
        entries.push(Arc::clone(&mask));
        Ok(mask)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
