//! Address queries, quality tiers and postal-code handling.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A raw address as supplied by the caller. Never mutated by the resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressQuery {
    #[serde(alias = "address")]
    pub raw_text: String,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default, alias = "municipality")]
    pub locality: Option<String>,
}

impl AddressQuery {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            postal_code: None,
            locality: None,
        }
    }

    pub fn with_postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.postal_code = Some(postal_code.into());
        self
    }

    pub fn with_locality(mut self, locality: impl Into<String>) -> Self {
        self.locality = Some(locality.into());
        self
    }

    /// Postal code trimmed, `None` when absent or blank.
    pub fn postal_code(&self) -> Option<&str> {
        non_blank(self.postal_code.as_deref())
    }

    /// Locality trimmed, `None` when absent or blank.
    pub fn locality(&self) -> Option<&str> {
        non_blank(self.locality.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Confidence of a resolved coordinate, 0..=8.
///
/// Lower is more precise, except tier 0 which marks caller-supplied
/// coordinates of unknown precision. Tier 8 means unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityTier(u8);

impl QualityTier {
    pub const UNVALIDATED: Self = Self(0);
    pub const EXACT: Self = Self(1);
    pub const STREET: Self = Self(2);
    pub const POSTAL_AREA: Self = Self(4);
    pub const LOCALITY: Self = Self(5);
    pub const MUNICIPALITY: Self = Self(6);
    pub const REGION: Self = Self(7);
    pub const UNRESOLVED: Self = Self(8);

    pub fn new(value: u8) -> Option<Self> {
        (value <= 8).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// Strictly more precise than `other`.
    pub fn is_better_than(self, other: Self) -> bool {
        self.0 < other.0
    }

    /// Street-level precision (tiers 1 and 2).
    pub fn is_precise(self) -> bool {
        matches!(self.0, 1 | 2)
    }

    pub fn is_resolved(self) -> bool {
        self.0 < 8
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which tier of the waterfall produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Source {
    Local,
    SpecializedLookup,
    OpenGeocoder,
    CommercialGeocoder,
    Failed,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "LOCAL",
            Self::SpecializedLookup => "SPECIALIZED_LOOKUP",
            Self::OpenGeocoder => "OPEN_GEOCODER",
            Self::CommercialGeocoder => "COMMERCIAL_GEOCODER",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static POSTAL_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})(?:-(\d{3}))?$").expect("valid postal regex"));

/// The 4-digit prefix of a well-formed `NNNN` or `NNNN-NNN` postal code.
pub fn postal_prefix(code: &str) -> Option<&str> {
    POSTAL_CODE
        .captures(code.trim())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Split a full `NNNN-NNN` postal code into its two parts.
pub fn split_full_postal(code: &str) -> Option<(&str, &str)> {
    let caps = POSTAL_CODE.captures(code.trim())?;
    Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

static ABBREVIATIONS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"\bR\.\s", "Rua "),
        (r"\bAv\.\s", "Avenida "),
        (r"\bTv\.\s", "Travessa "),
        (r"\bPc\.\s", "Praça "),
        (r"\bPç\.\s", "Praça "),
        (r"\bLg\.\s", "Largo "),
        (r"\bQta\.\s", "Quinta "),
        (r"\bEstr\.\s", "Estrada "),
        (r"\bAz\.\s", "Azinhaga "),
        (r"\bAl\.\s", "Alameda "),
        (r"\bLt\.\s", "Lote "),
        (r"\bLt\s", "Lote "),
        (r"\bCv\.\s", "Cave "),
        (r"\bR/C\b", "Rés-do-chão"),
        (r"\bEsq\.\s", "Esquerdo "),
        (r"\bDir\.\s", "Direito "),
        (r"\bDr\.\s", "Doutor "),
        (r"\bEng\.\s", "Engenheiro "),
        (r"\bSto\.\s", "Santo "),
        (r"\bSta\.\s", "Santa "),
        (r"\bN\.º\s", "nº "),
        (r"\bNº\s", "nº "),
    ]
    .into_iter()
    .map(|(pattern, replacement)| {
        let regex = Regex::new(&format!("(?i){pattern}")).expect("valid abbreviation regex");
        (regex, replacement)
    })
    .collect()
});

/// Expand common street-type and title abbreviations.
///
/// Matching is case-insensitive and runs before any lookup, so "av. da
/// liberdade" and "Avenida da Liberdade" reach the gazetteer identically.
pub fn normalize_address(raw: &str) -> String {
    let mut address = raw.trim().to_string();
    for (pattern, replacement) in ABBREVIATIONS.iter() {
        if pattern.is_match(&address) {
            address = pattern.replace_all(&address, *replacement).into_owned();
        }
    }
    address
}

/// Axis-aligned latitude/longitude box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub const fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }
}

/// Mainland Portugal, Madeira (with Porto Santo) and the Azores.
pub fn portugal_bounds() -> Vec<BoundingBox> {
    vec![
        BoundingBox::new(36.9, 42.2, -9.6, -6.1),
        BoundingBox::new(32.3, 33.2, -17.3, -16.2),
        BoundingBox::new(36.5, 40.0, -31.5, -24.5),
    ]
}

/// Whether a coordinate falls inside any of the given regions.
pub fn within_regions(regions: &[BoundingBox], lat: f64, lon: f64) -> bool {
    lat.is_finite() && lon.is_finite() && regions.iter().any(|b| b.contains(lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expands_street_abbreviations() {
        assert_eq!(normalize_address("R. das Flores 10"), "Rua das Flores 10");
        assert_eq!(normalize_address("av. da Liberdade 5"), "Avenida da Liberdade 5");
        assert_eq!(normalize_address("  Lg. do Carmo  "), "Largo do Carmo");
        assert_eq!(normalize_address("Rua X 3 R/C"), "Rua X 3 Rés-do-chão");
        assert_eq!(normalize_address("Lt 10"), "Lote 10");
    }

    #[test]
    fn test_abbreviation_needs_word_boundary() {
        // "Dr." must not be read as "D" + "R."
        assert_eq!(normalize_address("Rua Dr. Sousa"), "Rua Doutor Sousa");
        assert_eq!(normalize_address("Estr. Nacional"), "Estrada Nacional");
    }

    #[test]
    fn test_empty_address_normalizes_to_empty() {
        assert_eq!(normalize_address("   "), "");
    }

    #[test]
    fn test_postal_prefix() {
        assert_eq!(postal_prefix("1000"), Some("1000"));
        assert_eq!(postal_prefix(" 1000-001 "), Some("1000"));
        assert_eq!(postal_prefix("100"), None);
        assert_eq!(postal_prefix("1000001"), None);
        assert_eq!(postal_prefix("ABCD"), None);
    }

    #[test]
    fn test_split_full_postal() {
        assert_eq!(split_full_postal("7600-401"), Some(("7600", "401")));
        assert_eq!(split_full_postal("7600"), None);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(QualityTier::EXACT.is_better_than(QualityTier::STREET));
        assert!(!QualityTier::LOCALITY.is_better_than(QualityTier::LOCALITY));
        assert!(QualityTier::STREET.is_precise());
        assert!(!QualityTier::POSTAL_AREA.is_precise());
        assert!(!QualityTier::UNRESOLVED.is_resolved());
        assert_eq!(QualityTier::new(9), None);
    }

    #[test]
    fn test_portugal_bounds() {
        let regions = portugal_bounds();
        assert!(within_regions(&regions, 38.72, -9.14)); // Lisbon
        assert!(within_regions(&regions, 32.65, -16.91)); // Funchal
        assert!(within_regions(&regions, 37.74, -25.67)); // Ponta Delgada
        assert!(!within_regions(&regions, 40.42, -3.70)); // Madrid
        assert!(!within_regions(&regions, f64::NAN, -9.0));
    }
}
