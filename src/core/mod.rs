//! Core albedo retrieval modules

pub mod quality;
pub mod terrain;
pub mod topographic;
pub mod classify;
pub mod brdf;
pub mod broadband;
pub mod glacier;
pub mod retrieval;
pub mod comparison;

// Re-export main types
pub use quality::{QaFlags, QaOutcome, QaPreset, QaProfile, QaSummary, QualityFilter};
pub use terrain::{resample_bilinear, TerrainCache, TerrainGrids};
pub use topographic::{TopographicCorrector, TopographicParams};
pub use classify::{BandSource, Classification, ClassifierParams, SurfaceClassifier};
pub use brdf::{AnisotropyCorrector, AnisotropyModel, BrdfClampPolicy, BrdfCoefficients, BrdfTable, NarrowbandStack};
pub use broadband::{merge_narrowbands, BroadbandAlbedo, BroadbandCoefficients, BroadbandConverter, MergedNarrowbands};
pub use glacier::{GlacierMask, GlacierMaskBuilder, GlacierMaskCache, GlacierMaskParams, GlacierPolygon, PolygonRings};
pub use retrieval::{AlbedoRetrieval, AlbedoSummary, RetrievalState, RetrievalTrace, RetrievedAlbedo, SeriesOutcome};
pub use comparison::{align_products, AlbedoProduct, AlignedRecord, ComparisonStats, ScaledBandProduct};
