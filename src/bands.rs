//! Band naming and integer scaling of the MODIS daily surface reflectance
//! product (MOD09GA / MYD09GA) and of the bands this crate produces.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale from stored integer to surface reflectance
pub const REFLECTANCE_SCALE: f64 = 0.0001;
/// Scale from stored integer to degrees
pub const ANGLE_SCALE: f64 = 0.01;

pub const SOLAR_ZENITH: &str = "SolarZenith";
pub const SOLAR_AZIMUTH: &str = "SolarAzimuth";
pub const SENSOR_ZENITH: &str = "SensorZenith";
pub const SENSOR_AZIMUTH: &str = "SensorAzimuth";
pub const STATE_QA: &str = "state_1km";

/// Angle bands every observation must carry
pub const ANGLE_BANDS: [&str; 4] = [SOLAR_ZENITH, SOLAR_AZIMUTH, SENSOR_ZENITH, SENSOR_AZIMUTH];

pub const SOLAR_ZENITH_CORRECTED: &str = "solar_zenith_corrected";
pub const SENSOR_ZENITH_CORRECTED: &str = "sensor_zenith_corrected";
pub const NDSI: &str = "NDSI";
pub const SNOW_MASK: &str = "snow_mask";
pub const ICE_ALBEDO: &str = "ice_albedo";
pub const SNOW_ALBEDO: &str = "snow_albedo";
pub const BROADBAND_ALBEDO: &str = "broadband_albedo";
pub const GLACIER_FRACTION: &str = "glacier_fraction";

/// MODIS land bands 1-7
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BandId {
    B1,
    B2,
    B3,
    B4,
    B5,
    B6,
    B7,
}

impl BandId {
    /// Bands used by the retrieval (band 6 is not part of the broadband equations)
    pub const RETRIEVAL: [BandId; 6] = [
        BandId::B1,
        BandId::B2,
        BandId::B3,
        BandId::B4,
        BandId::B5,
        BandId::B7,
    ];

    /// All land bands, including the optional band 6
    pub const ALL: [BandId; 7] = [
        BandId::B1,
        BandId::B2,
        BandId::B3,
        BandId::B4,
        BandId::B5,
        BandId::B6,
        BandId::B7,
    ];

    /// Visible green band used as the NDSI numerator
    pub const GREEN: BandId = BandId::B4;

    pub fn number(&self) -> u8 {
        match self {
            BandId::B1 => 1,
            BandId::B2 => 2,
            BandId::B3 => 3,
            BandId::B4 => 4,
            BandId::B5 => 5,
            BandId::B6 => 6,
            BandId::B7 => 7,
        }
    }

    /// Stored integer reflectance band, e.g. `sur_refl_b04`
    pub fn raw_name(&self) -> String {
        format!("sur_refl_b{:02}", self.number())
    }

    /// Topographically corrected reflectance, e.g. `sur_refl_b04_topo`
    pub fn topo_name(&self) -> String {
        format!("sur_refl_b{:02}_topo", self.number())
    }

    /// Narrowband albedo after anisotropy correction, e.g. `narrowband_b4`
    pub fn narrowband_name(&self) -> String {
        format!("narrowband_b{}", self.number())
    }
}

impl fmt::Display for BandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.number())
    }
}
