mod common;

use common::*;
use glacier_albedo::bands::STATE_QA;
use glacier_albedo::config::QaSelection;
use glacier_albedo::core::{QaPreset, TerrainCache};
use glacier_albedo::io::{parse_granule_id, read_glacier_polygon};
use glacier_albedo::{
    AlbedoError, AlbedoRetrieval, GlacierMaskCache, Observation, Platform, RasterTimeSeries,
    RetrievalConfig, TerrainGrids,
};
use ndarray::array;
use std::io::Write;
use std::sync::Arc;

const CONFIG: &str = r#"{
    "version": 1,
    "quality": "relaxed",
    "glacier_fraction_threshold": 0.5,
    "melt_season": {"start_month": 7, "end_month": 8},
    "priority_platform": "aqua"
}"#;

const OUTLINE: &str = r#"{
    "type": "FeatureCollection",
    "features": [{
        "type": "Feature",
        "properties": {"name": "test glacier"},
        "geometry": {
            "type": "Polygon",
            "coordinates": [[[-10, -10], [1010, -10], [1010, 510], [-10, 510], [-10, -10]]]
        }
    }]
}"#;

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_run_from_files() {
    init_logging();

    let config_file = write_temp(CONFIG);
    let outline_file = write_temp(OUTLINE);

    let config = RetrievalConfig::from_file(config_file.path()).unwrap();
    assert_eq!(config.quality, QaSelection::Preset(QaPreset::Relaxed));
    assert_eq!(config.priority_platform, Platform::Aqua);
    assert_eq!(config.glacier_supersampling, 16);

    let polygon = Arc::new(read_glacier_polygon(outline_file.path()).unwrap());
    let glacier_cache = GlacierMaskCache::new(polygon);
    let terrain_cache = TerrainCache::new();
    let terrain = terrain_cache
        .get_or_compute("test glacier", || Ok(TerrainGrids::flat(geometry())))
        .unwrap();

    let retrieval = AlbedoRetrieval::with_glacier_cache(config, terrain, &glacier_cache).unwrap();
    // Outline covers the lower row
    assert_eq!(retrieval.glacier_mask().glacier_cells(), 2);
    assert_eq!(glacier_cache.len(), 1);

    let ids = [
        "MOD09GA.A2023196.h10v03.061.2023198032145",
        "MYD09GA.A2023196.h10v03.061.2023198041702",
        "MOD09GA.A2023244.h10v03.061.2023246030015",
    ];
    let mut series = RasterTimeSeries::new();
    for id in ids {
        let granule = parse_granule_id(id).unwrap();
        let timestamp = granule.date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let raster = Scene::default()
            .raster()
            .with_band(STATE_QA, array![[CLEAR_QA, CLEAR_QA], [CLOUDY_QA, CLEAR_QA]])
            .unwrap();
        let observation = Observation::new(timestamp, granule.platform.unwrap(), raster)
            .with_product_id(id);
        series.push(observation).unwrap();
    }

    let outcome = retrieval.process_series(&series);
    // 2023-09-01 falls outside July-August
    assert_eq!(outcome.out_of_season, 1);
    assert_eq!(outcome.len(), 1);
    assert_eq!(outcome.deduplicated, 1);

    let record = &outcome.records[0];
    assert_eq!(record.platform, Platform::Aqua);
    assert!(record.product_id.as_deref().unwrap().starts_with("MYD09GA"));
    // The relaxed profile keeps the cloudy glacier cell
    assert_eq!(record.summary.unwrap().count, 2);
}

#[test]
fn test_strict_profile_drops_cloudy_cells() {
    init_logging();

    let retrieval =
        AlbedoRetrieval::new(RetrievalConfig::default(), flat_terrain(), full_glacier()).unwrap();
    let raster = Scene::default()
        .raster()
        .with_band(STATE_QA, array![[CLOUDY_QA, CLOUDY_QA], [CLOUDY_QA, CLEAR_QA]])
        .unwrap();
    let observation = Observation::new(july(14, 18), Platform::Terra, raster);
    let record = retrieval.process_observation(&observation).unwrap().unwrap();
    assert_eq!(record.summary.unwrap().count, 1);
}

#[test]
fn test_invalid_configuration_is_rejected() {
    let err = RetrievalConfig::from_json_str(r#"{"version": 2}"#).unwrap_err();
    assert!(matches!(err, AlbedoError::Config(_)));

    let err = RetrievalConfig::from_json_str(r#"{"glacier_fraction_threshold": 0.0}"#).unwrap_err();
    assert!(matches!(err, AlbedoError::Config(_)));

    let config = RetrievalConfig {
        ndsi_threshold: 1.5,
        ..RetrievalConfig::default()
    };
    let result = AlbedoRetrieval::new(config, flat_terrain(), full_glacier());
    assert!(matches!(result, Err(AlbedoError::Config(_))));
}

#[test]
fn test_terrain_cache_reuses_grids() {
    let cache = TerrainCache::new();
    let first = cache
        .get_or_compute("aoi", || Ok(TerrainGrids::flat(geometry())))
        .unwrap();
    let second = cache
        .get_or_compute("aoi", || Err(AlbedoError::Processing("recomputed".to_string())))
        .unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(cache.len(), 1);
}
