//! Versioned configuration of a retrieval run.

use crate::core::brdf::BrdfClampPolicy;
use crate::core::quality::{QaPreset, QaProfile};
use crate::types::{AlbedoError, AlbedoResult, Platform};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration format understood by this crate
pub const CONFIG_VERSION: u32 = 1;

/// Quality profile given either by preset name or in full
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QaSelection {
    Preset(QaPreset),
    Custom(QaProfile),
}

impl QaSelection {
    pub fn profile(&self) -> QaProfile {
        match self {
            QaSelection::Preset(preset) => QaProfile::from_preset(*preset),
            QaSelection::Custom(profile) => profile.clone(),
        }
    }
}

impl Default for QaSelection {
    fn default() -> Self {
        QaSelection::Preset(QaPreset::Strict)
    }
}

/// Months (inclusive) whose observations enter the series.
///
/// `start_month > end_month` wraps over the new year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeltSeason {
    pub start_month: u32,
    pub end_month: u32,
    pub enabled: bool,
}

impl MeltSeason {
    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        if !self.enabled {
            return true;
        }
        let month = timestamp.month();
        if self.start_month <= self.end_month {
            (self.start_month..=self.end_month).contains(&month)
        } else {
            month >= self.start_month || month <= self.end_month
        }
    }
}

impl Default for MeltSeason {
    fn default() -> Self {
        Self {
            start_month: 6,
            end_month: 9,
            enabled: true,
        }
    }
}

/// Complete configuration surface of the retrieval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub version: u32,
    pub quality: QaSelection,
    /// Minimum glacier coverage of a cell to keep it
    pub glacier_fraction_threshold: f64,
    /// Sub-cells per cell edge when estimating glacier coverage
    pub glacier_supersampling: usize,
    pub brdf_clamp: BrdfClampPolicy,
    pub melt_season: MeltSeason,
    /// NDSI above this value is snow
    pub ndsi_threshold: f64,
    /// Bounds applied to the illumination correction factor
    pub topo_factor_range: (f64, f64),
    /// Platform kept when Terra and Aqua share a timestamp
    pub priority_platform: Platform,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            quality: QaSelection::default(),
            glacier_fraction_threshold: 0.5,
            glacier_supersampling: 16,
            brdf_clamp: BrdfClampPolicy::default(),
            melt_season: MeltSeason::default(),
            ndsi_threshold: 0.4,
            topo_factor_range: (0.2, 5.0),
            priority_platform: Platform::Terra,
        }
    }
}

impl RetrievalConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> AlbedoResult<Self> {
        let config: RetrievalConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> AlbedoResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading retrieval configuration from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_string(&self) -> AlbedoResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn quality_profile(&self) -> QaProfile {
        self.quality.profile()
    }

    pub fn validate(&self) -> AlbedoResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(AlbedoError::Config(format!(
                "unsupported configuration version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }

        let threshold = self.glacier_fraction_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(AlbedoError::Config(format!(
                "glacier_fraction_threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        if self.glacier_supersampling == 0 || self.glacier_supersampling > 256 {
            return Err(AlbedoError::Config(format!(
                "glacier_supersampling must be in 1..=256, got {}",
                self.glacier_supersampling
            )));
        }

        if !(self.ndsi_threshold > -1.0 && self.ndsi_threshold < 1.0) {
            return Err(AlbedoError::Config(format!(
                "ndsi_threshold must be in (-1, 1), got {}",
                self.ndsi_threshold
            )));
        }

        let (low, high) = self.topo_factor_range;
        if !(low.is_finite() && high.is_finite() && low > 0.0 && low < high) {
            return Err(AlbedoError::Config(format!(
                "topo_factor_range must satisfy 0 < low < high, got ({}, {})",
                low, high
            )));
        }

        for month in [self.melt_season.start_month, self.melt_season.end_month] {
            if !(1..=12).contains(&month) {
                return Err(AlbedoError::Config(format!(
                    "melt season month {} outside 1..=12",
                    month
                )));
            }
        }

        if let QaSelection::Custom(profile) = &self.quality {
            profile.layout.validate()?;
            if let Some(max) = profile.max_solar_zenith_deg {
                if !(max > 0.0 && max <= 90.0) {
                    return Err(AlbedoError::Config(format!(
                        "max_solar_zenith_deg must be in (0, 90], got {}",
                        max
                    )));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::quality::BitField;
    use chrono::TimeZone;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RetrievalConfig::default();
        config.validate().unwrap();
        assert_eq!(config.quality_profile(), QaProfile::strict());
        assert_eq!(config.brdf_clamp, BrdfClampPolicy::Unclamped);
        assert_eq!(config.priority_platform, Platform::Terra);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = RetrievalConfig::from_json_str(
            r#"{ "quality": "glacier_optimized", "glacier_fraction_threshold": 0.9 }"#,
        )
        .unwrap();
        assert_eq!(config.quality_profile(), QaProfile::relaxed());
        assert_eq!(config.glacier_fraction_threshold, 0.9);
        assert_eq!(config.glacier_supersampling, 16);
        assert_eq!(config.topo_factor_range, (0.2, 5.0));
    }

    #[test]
    fn test_custom_quality_profile() {
        let mut profile = QaProfile::maximum();
        profile.max_solar_zenith_deg = Some(60.0);
        let config = RetrievalConfig {
            quality: QaSelection::Custom(profile.clone()),
            brdf_clamp: BrdfClampPolicy::ClampUnit,
            ..RetrievalConfig::default()
        };
        let json = config.to_json_string().unwrap();
        let parsed = RetrievalConfig::from_json_str(&json).unwrap();
        assert_eq!(parsed.quality_profile(), profile);
        assert_eq!(parsed.brdf_clamp, BrdfClampPolicy::ClampUnit);
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            r#"{ "version": 2 }"#,
            r#"{ "glacier_fraction_threshold": 0.0 }"#,
            r#"{ "glacier_supersampling": 0 }"#,
            r#"{ "topo_factor_range": [5.0, 0.2] }"#,
            r#"{ "melt_season": { "start_month": 13 } }"#,
            r#"{ "ndsi_threshold": 1.5 }"#,
        ];
        for json in cases {
            let result = RetrievalConfig::from_json_str(json);
            assert!(matches!(result, Err(AlbedoError::Config(_))), "{}", json);
        }

        let mut profile = QaProfile::strict();
        profile.layout.saturation = BitField::new(40, 32);
        let wide_field = RetrievalConfig {
            quality: QaSelection::Custom(profile),
            ..RetrievalConfig::default()
        };
        let json = wide_field.to_json_string().unwrap();
        assert!(matches!(
            RetrievalConfig::from_json_str(&json),
            Err(AlbedoError::Config(_))
        ));

        assert!(matches!(
            RetrievalConfig::from_json_str("{ not json"),
            Err(AlbedoError::Json(_))
        ));
    }

    #[test]
    fn test_melt_season() {
        let season = MeltSeason::default();
        let july = Utc.with_ymd_and_hms(2023, 7, 15, 18, 0, 0).unwrap();
        let may = Utc.with_ymd_and_hms(2023, 5, 31, 23, 59, 59).unwrap();
        let sept = Utc.with_ymd_and_hms(2023, 9, 30, 12, 0, 0).unwrap();
        assert!(season.contains(&july));
        assert!(season.contains(&sept));
        assert!(!season.contains(&may));

        let disabled = MeltSeason { enabled: false, ..season };
        assert!(disabled.contains(&may));

        let austral = MeltSeason { start_month: 11, end_month: 2, enabled: true };
        let january = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(austral.contains(&january));
        assert!(!austral.contains(&july));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "priority_platform": "aqua", "brdf_clamp": "clamp_unit" }}"#).unwrap();
        let config = RetrievalConfig::from_file(file.path()).unwrap();
        assert_eq!(config.priority_platform, Platform::Aqua);
        assert_eq!(config.brdf_clamp, BrdfClampPolicy::ClampUnit);

        let missing = RetrievalConfig::from_file(file.path().with_extension("absent"));
        assert!(matches!(missing, Err(AlbedoError::Io(_))));
    }
}
