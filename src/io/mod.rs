//! Identifier parsing and vector input

pub mod geojson;
pub mod granule;

pub use geojson::{parse_glacier_polygon, read_glacier_polygon};
pub use granule::{parse_granule_id, product_family, GranuleId};
