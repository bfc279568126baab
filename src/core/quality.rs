//! Per-pixel quality filtering from the bit-packed `state_1km` word and the
//! solar zenith angle.
//!
//! Every condition can be switched off independently; the validity mask is
//! the conjunction of the enabled ones.

use crate::bands::{ANGLE_SCALE, SOLAR_ZENITH, STATE_QA};
use crate::types::{AlbedoError, AlbedoResult, Grid, MultiBandRaster, ValidityMask};
use ndarray::Zip;
use serde::{Deserialize, Serialize};

/// Contiguous bit range inside the quality word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitField {
    pub offset: u8,
    pub width: u8,
}

impl BitField {
    pub const fn new(offset: u8, width: u8) -> Self {
        Self { offset, width }
    }

    /// Field value; bits beyond the 32-bit word read as zero
    pub fn extract(&self, word: u32) -> u8 {
        let mask = 1u32
            .checked_shl(u32::from(self.width))
            .map_or(u32::MAX, |bit| bit - 1);
        let shifted = word.checked_shr(u32::from(self.offset)).unwrap_or(0);
        (shifted & mask) as u8
    }

    /// 1 to 8 bits, entirely inside the 32-bit word
    pub fn validate(&self, name: &str) -> AlbedoResult<()> {
        if self.width == 0 || self.width > 8 || u32::from(self.offset) + u32::from(self.width) > 32 {
            return Err(AlbedoError::Config(format!(
                "quality field '{}' (offset {}, width {}) must be 1-8 bits within a 32-bit word",
                name, self.offset, self.width
            )));
        }
        Ok(())
    }
}

/// Position of each decoded field in the quality word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaBitLayout {
    pub cloud_state: BitField,
    pub cloud_shadow: BitField,
    pub aerosol: BitField,
    pub cirrus: BitField,
    pub internal_cloud: BitField,
    pub snow_ice_confidence: BitField,
    pub saturation: BitField,
}

impl Default for QaBitLayout {
    fn default() -> Self {
        // state_1km bits 0-13; saturation is packed above the 16-bit state
        // word so it never aliases the BRDF (14) and snow mask (15) flags
        Self {
            cloud_state: BitField::new(0, 2),
            cloud_shadow: BitField::new(2, 1),
            aerosol: BitField::new(6, 2),
            cirrus: BitField::new(8, 2),
            internal_cloud: BitField::new(10, 1),
            snow_ice_confidence: BitField::new(12, 2),
            saturation: BitField::new(16, 3),
        }
    }
}

impl QaBitLayout {
    pub fn validate(&self) -> AlbedoResult<()> {
        let fields = [
            ("cloud_state", self.cloud_state),
            ("cloud_shadow", self.cloud_shadow),
            ("aerosol", self.aerosol),
            ("cirrus", self.cirrus),
            ("internal_cloud", self.internal_cloud),
            ("snow_ice_confidence", self.snow_ice_confidence),
            ("saturation", self.saturation),
        ];
        for (name, field) in fields {
            field.validate(name)?;
        }
        Ok(())
    }
}

/// Cloud state values of bits 0-1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudState {
    Clear = 0,
    Cloudy = 1,
    Mixed = 2,
    NotSet = 3,
}

impl CloudState {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x3 {
            0 => CloudState::Clear,
            1 => CloudState::Cloudy,
            2 => CloudState::Mixed,
            _ => CloudState::NotSet,
        }
    }
}

/// Decoded quality flags of one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QaFlags {
    pub cloud_state: u8,
    pub cloud_shadow: bool,
    pub aerosol: u8,
    pub cirrus: u8,
    pub internal_cloud: bool,
    pub snow_ice_confidence: u8,
    pub saturation: u8,
}

impl QaFlags {
    pub fn decode(word: u32, layout: &QaBitLayout) -> Self {
        Self {
            cloud_state: layout.cloud_state.extract(word),
            cloud_shadow: layout.cloud_shadow.extract(word) != 0,
            aerosol: layout.aerosol.extract(word),
            cirrus: layout.cirrus.extract(word),
            internal_cloud: layout.internal_cloud.extract(word) != 0,
            snow_ice_confidence: layout.snow_ice_confidence.extract(word),
            saturation: layout.saturation.extract(word),
        }
    }

    pub fn cloud(&self) -> CloudState {
        CloudState::from_bits(self.cloud_state)
    }
}

/// Named quality profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QaPreset {
    Strict,
    Relaxed,
    Moderate,
    Maximum,
    GlacierOptimized,
}

/// Enabled quality conditions and their thresholds.
///
/// `None` / `false` disables a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QaProfile {
    /// Highest accepted cloud state (0 = clear only)
    pub max_cloud_state: Option<u8>,
    pub reject_cloud_shadow: bool,
    pub max_cirrus: Option<u8>,
    pub reject_internal_cloud: bool,
    pub min_snow_ice_confidence: Option<u8>,
    /// Reject cells with a non-zero `layout.saturation` field. The default
    /// layout reads bits 16-18, which the data-access layer fills; state_1km
    /// itself has no saturation bits.
    pub reject_saturation: bool,
    pub max_aerosol: Option<u8>,
    /// Exclusive upper bound on the solar zenith angle (degrees)
    pub max_solar_zenith_deg: Option<f64>,
    #[serde(default)]
    pub layout: QaBitLayout,
}

impl QaProfile {
    /// Clear sky only, no cirrus, internal cloud flag honoured, SZA < 70°
    pub fn strict() -> Self {
        Self {
            max_cloud_state: Some(CloudState::Clear as u8),
            reject_cloud_shadow: true,
            max_cirrus: Some(0),
            reject_internal_cloud: true,
            min_snow_ice_confidence: Some(1),
            reject_saturation: false,
            max_aerosol: None,
            max_solar_zenith_deg: Some(70.0),
            layout: QaBitLayout::default(),
        }
    }

    /// Glacier-oriented relaxation: cloudy state tolerated, internal cloud
    /// flag ignored, SZA < 75°
    pub fn relaxed() -> Self {
        Self {
            max_cloud_state: Some(CloudState::Cloudy as u8),
            reject_internal_cloud: false,
            max_solar_zenith_deg: Some(75.0),
            ..Self::strict()
        }
    }

    pub fn glacier_optimized() -> Self {
        Self::relaxed()
    }

    pub fn moderate() -> Self {
        Self {
            max_cloud_state: Some(CloudState::Cloudy as u8),
            max_cirrus: Some(1),
            max_solar_zenith_deg: Some(80.0),
            ..Self::strict()
        }
    }

    pub fn maximum() -> Self {
        Self {
            max_cloud_state: Some(CloudState::Mixed as u8),
            max_cirrus: Some(2),
            reject_internal_cloud: false,
            min_snow_ice_confidence: None,
            max_solar_zenith_deg: Some(85.0),
            ..Self::strict()
        }
    }

    pub fn from_preset(preset: QaPreset) -> Self {
        match preset {
            QaPreset::Strict => Self::strict(),
            QaPreset::Relaxed => Self::relaxed(),
            QaPreset::Moderate => Self::moderate(),
            QaPreset::Maximum => Self::maximum(),
            QaPreset::GlacierOptimized => Self::glacier_optimized(),
        }
    }

    /// Whether a cell passes every enabled condition
    pub fn accepts(&self, flags: &QaFlags, solar_zenith_deg: f64) -> bool {
        if let Some(max) = self.max_cloud_state {
            if flags.cloud_state > max {
                return false;
            }
        }
        if self.reject_cloud_shadow && flags.cloud_shadow {
            return false;
        }
        if let Some(max) = self.max_cirrus {
            if flags.cirrus > max {
                return false;
            }
        }
        if self.reject_internal_cloud && flags.internal_cloud {
            return false;
        }
        if let Some(min) = self.min_snow_ice_confidence {
            if flags.snow_ice_confidence < min {
                return false;
            }
        }
        if self.reject_saturation && flags.saturation != 0 {
            return false;
        }
        if let Some(max) = self.max_aerosol {
            if flags.aerosol > max {
                return false;
            }
        }
        match self.max_solar_zenith_deg {
            Some(max) => solar_zenith_deg < max,
            None => true,
        }
    }
}

impl Default for QaProfile {
    fn default() -> Self {
        Self::strict()
    }
}

/// Result of quality filtering one raster
#[derive(Debug, Clone, PartialEq)]
pub enum QaOutcome {
    Filtered(ValidityMask),
    /// Quality or solar zenith band absent; the mask is entirely invalid
    MissingQualityBand { band: String, mask: ValidityMask },
}

impl QaOutcome {
    pub fn mask(&self) -> &ValidityMask {
        match self {
            QaOutcome::Filtered(mask) | QaOutcome::MissingQualityBand { mask, .. } => mask,
        }
    }

    pub fn into_mask(self) -> ValidityMask {
        match self {
            QaOutcome::Filtered(mask) | QaOutcome::MissingQualityBand { mask, .. } => mask,
        }
    }

    pub fn is_filtered(&self) -> bool {
        matches!(self, QaOutcome::Filtered(_))
    }
}

/// Histogram of decoded flags over a raster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QaSummary {
    pub total: usize,
    /// Cells whose quality value is not a non-negative integer
    pub undecodable: usize,
    pub cloud_state: [usize; 4],
    pub cirrus: [usize; 4],
    pub aerosol: [usize; 4],
    pub snow_ice_confidence: [usize; 4],
    pub cloud_shadow: usize,
    pub internal_cloud: usize,
    pub saturated: usize,
    pub accepted: usize,
}

/// Quality filter processor
#[derive(Debug, Clone)]
pub struct QualityFilter {
    profile: QaProfile,
}

impl QualityFilter {
    pub fn new(profile: QaProfile) -> Self {
        Self { profile }
    }

    pub fn strict() -> Self {
        Self::new(QaProfile::strict())
    }

    pub fn profile(&self) -> &QaProfile {
        &self.profile
    }

    /// Build the validity mask of a raster.
    ///
    /// A missing quality or solar zenith band yields an all-invalid mask
    /// flagged as [`QaOutcome::MissingQualityBand`].
    pub fn evaluate(&self, raster: &MultiBandRaster) -> QaOutcome {
        let geometry = *raster.geometry();
        let (qa, solar_zenith) = match (raster.band(STATE_QA), raster.band(SOLAR_ZENITH)) {
            (Some(qa), Some(sz)) => (qa, sz),
            (qa, _) => {
                let band = if qa.is_none() { STATE_QA } else { SOLAR_ZENITH };
                log::warn!("Quality input '{}' missing, treating raster as invalid", band);
                return QaOutcome::MissingQualityBand {
                    band: band.to_string(),
                    mask: Grid::filled(geometry, false),
                };
            }
        };

        let zip = Zip::from(qa).and(solar_zenith);
        let cell = |&word: &f64, &sz: &f64| self.cell_valid(word, sz);

        #[cfg(feature = "parallel")]
        let data = zip.par_map_collect(cell);
        #[cfg(not(feature = "parallel"))]
        let data = zip.map_collect(cell);

        let valid = data.iter().filter(|&&v| v).count();
        log::debug!(
            "Quality filter kept {} of {} cells",
            valid,
            geometry.cell_count()
        );

        // Shape was validated when the bands were attached
        match Grid::new(geometry, data) {
            Ok(mask) => QaOutcome::Filtered(mask),
            Err(_) => QaOutcome::MissingQualityBand {
                band: STATE_QA.to_string(),
                mask: Grid::filled(geometry, false),
            },
        }
    }

    /// Flag histograms for quality reporting
    pub fn summary(&self, raster: &MultiBandRaster) -> AlbedoResult<QaSummary> {
        let qa = raster.require_band(STATE_QA)?;
        let solar_zenith = raster.require_band(SOLAR_ZENITH)?;
        let layout = &self.profile.layout;

        let mut summary = QaSummary::default();
        for (&word, &sz) in qa.iter().zip(solar_zenith.iter()) {
            summary.total += 1;
            let Some(word) = decode_word(word) else {
                summary.undecodable += 1;
                continue;
            };
            let flags = QaFlags::decode(word, layout);
            summary.cloud_state[flags.cloud_state as usize & 0x3] += 1;
            summary.cirrus[flags.cirrus as usize & 0x3] += 1;
            summary.aerosol[flags.aerosol as usize & 0x3] += 1;
            summary.snow_ice_confidence[flags.snow_ice_confidence as usize & 0x3] += 1;
            summary.cloud_shadow += usize::from(flags.cloud_shadow);
            summary.internal_cloud += usize::from(flags.internal_cloud);
            summary.saturated += usize::from(flags.saturation != 0);
            summary.accepted += usize::from(self.profile.accepts(&flags, sz * ANGLE_SCALE));
        }
        Ok(summary)
    }

    fn cell_valid(&self, word: f64, solar_zenith_raw: f64) -> bool {
        match decode_word(word) {
            Some(word) => {
                let flags = QaFlags::decode(word, &self.profile.layout);
                self.profile.accepts(&flags, solar_zenith_raw * ANGLE_SCALE)
            }
            None => false,
        }
    }
}

impl Default for QualityFilter {
    fn default() -> Self {
        Self::strict()
    }
}

/// Quality words are stored as floats; only exact non-negative integers decode
fn decode_word(value: f64) -> Option<u32> {
    if value.is_finite() && value >= 0.0 && value <= u32::MAX as f64 && value.fract() == 0.0 {
        Some(value as u32)
    } else {
        None
    }
}
