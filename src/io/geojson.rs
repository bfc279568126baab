//! Glacier outlines from GeoJSON.
//!
//! Coordinates are taken as-is: the outline must already be in the
//! projection of the working grid.

use crate::core::glacier::{GlacierPolygon, PolygonRings};
use crate::types::{AlbedoError, AlbedoResult};
use serde::Deserialize;
use std::path::Path;

type Position = Vec<f64>;

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJson {
    Polygon {
        coordinates: Vec<Vec<Position>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Position>>>,
    },
    GeometryCollection {
        geometries: Vec<GeoJson>,
    },
    Feature {
        geometry: Option<Box<GeoJson>>,
    },
    FeatureCollection {
        features: Vec<GeoJson>,
    },
    #[serde(other)]
    Unsupported,
}

impl GeoJson {
    fn collect_polygons(self, out: &mut Vec<PolygonRings>) -> AlbedoResult<()> {
        match self {
            GeoJson::Polygon { coordinates } => out.push(rings_to_polygon(coordinates)?),
            GeoJson::MultiPolygon { coordinates } => {
                for polygon in coordinates {
                    out.push(rings_to_polygon(polygon)?);
                }
            }
            GeoJson::GeometryCollection { geometries } => {
                for geometry in geometries {
                    geometry.collect_polygons(out)?;
                }
            }
            GeoJson::Feature { geometry } => {
                if let Some(geometry) = geometry {
                    geometry.collect_polygons(out)?;
                }
            }
            GeoJson::FeatureCollection { features } => {
                for feature in features {
                    feature.collect_polygons(out)?;
                }
            }
            GeoJson::Unsupported => {
                log::debug!("Skipping non-polygon GeoJSON geometry");
            }
        }
        Ok(())
    }
}

fn rings_to_polygon(rings: Vec<Vec<Position>>) -> AlbedoResult<PolygonRings> {
    let mut rings = rings.into_iter().map(to_ring);
    let exterior = rings
        .next()
        .ok_or_else(|| AlbedoError::InvalidPolygon("polygon without rings".to_string()))??;
    let holes = rings.collect::<AlbedoResult<Vec<_>>>()?;
    Ok(PolygonRings::new(exterior, holes))
}

fn to_ring(positions: Vec<Position>) -> AlbedoResult<Vec<[f64; 2]>> {
    positions
        .into_iter()
        .map(|p| match p.as_slice() {
            [x, y, ..] => Ok([*x, *y]),
            _ => Err(AlbedoError::InvalidPolygon(format!(
                "position needs at least 2 coordinates, got {}",
                p.len()
            ))),
        })
        .collect()
}

/// Parse every Polygon and MultiPolygon in a GeoJSON document into one
/// glacier outline
pub fn parse_glacier_polygon(text: &str) -> AlbedoResult<GlacierPolygon> {
    let document: GeoJson = serde_json::from_str(text)?;
    let mut polygons = Vec::new();
    document.collect_polygons(&mut polygons)?;
    log::debug!("Parsed {} glacier polygon(s)", polygons.len());
    GlacierPolygon::new(polygons)
}

pub fn read_glacier_polygon<P: AsRef<Path>>(path: P) -> AlbedoResult<GlacierPolygon> {
    let path = path.as_ref();
    log::info!("Reading glacier outline from {}", path.display());
    let text = std::fs::read_to_string(path)?;
    parse_glacier_polygon(&text)
}
