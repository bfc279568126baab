//! MODIS granule and collection identifiers.

use crate::types::{AlbedoError, AlbedoResult, Platform};
use chrono::{Datelike, NaiveDate};
use regex::Regex;

/// Parsed identifier of one daily MODIS granule or image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranuleId {
    /// Short name, e.g. `MOD09GA`
    pub product: String,
    /// `None` for combined Terra+Aqua products (`MCD*`)
    pub platform: Option<Platform>,
    pub date: NaiveDate,
    /// Sinusoidal tile, e.g. `h10v03`
    pub tile: Option<String>,
    /// Collection, e.g. `061`
    pub collection: Option<String>,
}

impl GranuleId {
    pub fn family(&self) -> String {
        product_family(&self.product)
    }
}

/// Parse `MOD09GA.A2023182.h10v03.061.2023184035210` style granule names and
/// `MODIS/061/MOD09GA/2023_07_01` style image ids
pub fn parse_granule_id(id: &str) -> AlbedoResult<GranuleId> {
    let id = id.trim();

    let granule_pattern = Regex::new(
        r"^(M[OYC]D\w+?)\.A(\d{4})(\d{3})(?:\.(h\d{2}v\d{2}))?(?:\.(\d{3}))?(?:\.\d+)?(?:\.hdf)?$",
    )
    .map_err(|e| AlbedoError::Processing(format!("Regex error: {}", e)))?;
    if let Some(captures) = granule_pattern.captures(id) {
        let year: i32 = parse_number(&captures[2], id)?;
        let day_of_year: u32 = parse_number(&captures[3], id)?;
        let date = NaiveDate::from_yo_opt(year, day_of_year).ok_or_else(|| invalid(id))?;
        return Ok(GranuleId {
            platform: platform_of(&captures[1]),
            product: captures[1].to_string(),
            date,
            tile: captures.get(4).map(|m| m.as_str().to_string()),
            collection: captures.get(5).map(|m| m.as_str().to_string()),
        });
    }

    let image_pattern = Regex::new(r"^MODIS/(\d{3})/(M[OYC]D\w+)/(\d{4})_(\d{2})_(\d{2})$")
        .map_err(|e| AlbedoError::Processing(format!("Regex error: {}", e)))?;
    if let Some(captures) = image_pattern.captures(id) {
        let date = NaiveDate::from_ymd_opt(
            parse_number(&captures[3], id)?,
            parse_number(&captures[4], id)?,
            parse_number(&captures[5], id)?,
        )
        .ok_or_else(|| invalid(id))?;
        return Ok(GranuleId {
            platform: platform_of(&captures[2]),
            product: captures[2].to_string(),
            date,
            tile: None,
            collection: Some(captures[1].to_string()),
        });
    }

    Err(invalid(id))
}

/// Collapse Terra and Aqua variants of a product onto the Terra name, so
/// `MYD09GA` and `MOD09GA` share the family `MOD09GA`
pub fn product_family(product: &str) -> String {
    match product.strip_prefix("MYD") {
        Some(rest) => format!("MOD{}", rest),
        None => product.to_string(),
    }
}

/// Day of year of a date, as used in granule names
pub fn day_of_year(date: NaiveDate) -> u32 {
    date.ordinal()
}

fn platform_of(product: &str) -> Option<Platform> {
    product.get(..3).and_then(Platform::from_product_prefix)
}

fn parse_number<T: std::str::FromStr>(text: &str, id: &str) -> AlbedoResult<T> {
    text.parse().map_err(|_| invalid(id))
}

fn invalid(id: &str) -> AlbedoError {
    AlbedoError::Processing(format!("unrecognised MODIS identifier '{}'", id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granule_name() {
        let id = parse_granule_id("MOD09GA.A2023182.h10v03.061.2023184035210").unwrap();
        assert_eq!(id.product, "MOD09GA");
        assert_eq!(id.platform, Some(Platform::Terra));
        assert_eq!(id.date, NaiveDate::from_ymd_opt(2023, 7, 1).unwrap());
        assert_eq!(id.tile.as_deref(), Some("h10v03"));
        assert_eq!(id.collection.as_deref(), Some("061"));
        assert_eq!(day_of_year(id.date), 182);
    }

    #[test]
    fn test_image_id() {
        let id = parse_granule_id("MODIS/061/MYD09GA/2023_07_01").unwrap();
        assert_eq!(id.platform, Some(Platform::Aqua));
        assert_eq!(id.family(), "MOD09GA");
        assert_eq!(id.date, NaiveDate::from_ymd_opt(2023, 7, 1).unwrap());
        assert!(id.tile.is_none());
    }

    #[test]
    fn test_combined_product_has_no_platform() {
        let id = parse_granule_id("MODIS/061/MCD43A3/2023_08_15").unwrap();
        assert_eq!(id.platform, None);
        assert_eq!(id.family(), "MCD43A3");
    }

    #[test]
    fn test_invalid_ids() {
        assert!(parse_granule_id("LC08_L2SP_043024").is_err());
        assert!(parse_granule_id("MOD09GA.A2023400").is_err());
        assert!(parse_granule_id("MODIS/061/MOD09GA/2023_02_30").is_err());
    }

    #[test]
    fn test_product_family() {
        assert_eq!(product_family("MYD09GA"), "MOD09GA");
        assert_eq!(product_family("MOD10A1"), "MOD10A1");
        assert_eq!(product_family("MYD10A1"), "MOD10A1");
    }
}
