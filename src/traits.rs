//! Seams between the planner core and its external collaborators.
//!
//! Geocoding tiers and distance sources are reached only through these
//! traits, so the resolver and optimizer can be driven by HTTP clients in
//! production and by in-memory fakes in tests.

use crate::address::QualityTier;
use crate::error::Result;

/// Square matrix of distances indexed by location order.
pub type DistanceMatrix = Vec<Vec<f64>>;

/// Provides a distance matrix (kilometres) for a set of locations.
///
/// The matrix is indexed by the provided location order.
pub trait DistanceMatrixProvider {
    fn matrix_for(&self, locations: &[(f64, f64)]) -> Result<DistanceMatrix>;
}

/// A geocoding request as handed to an external tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocodeRequest {
    /// Address text after abbreviation expansion.
    pub address: String,
    pub postal_code: Option<String>,
    pub municipality: Option<String>,
    /// Country name appended to free-text queries.
    pub country: String,
    /// ISO 3166-1 alpha-2 code used for component filtering.
    pub country_code: String,
}

impl GeocodeRequest {
    /// Whether there is anything to search for at all.
    pub fn has_search_text(&self) -> bool {
        !self.address.is_empty() || self.postal_code.is_some() || self.municipality.is_some()
    }

    /// Free-text query with country context, e.g. "Rua X 1, 1000-001, Portugal".
    ///
    /// The municipality stands in for the street when no street is known.
    pub fn free_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if !self.address.is_empty() {
            parts.push(&self.address);
        } else if let Some(municipality) = self.municipality.as_deref() {
            parts.push(municipality);
        }
        if let Some(postal_code) = self.postal_code.as_deref() {
            parts.push(postal_code);
        }
        parts.push(&self.country);
        parts.join(", ")
    }
}

/// A coordinate found by an external tier, already mapped to a quality tier.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeHit {
    /// (lat, lon)
    pub coordinates: (f64, f64),
    pub address: String,
    pub quality_tier: QualityTier,
    pub match_type: String,
    pub external_id: Option<String>,
}

/// Direct lookup of a single postal subdivision (full 7-digit code).
pub trait PostalSubdivisionLookup {
    fn lookup(&self, postal4: &str, postal3: &str) -> Result<Option<GeocodeHit>>;
}

/// Free-text geocoding service (open or commercial tier).
pub trait Geocoder {
    fn geocode(&self, request: &GeocodeRequest) -> Result<Option<GeocodeHit>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(address: &str, postal_code: Option<&str>, municipality: Option<&str>) -> GeocodeRequest {
        GeocodeRequest {
            address: address.to_string(),
            postal_code: postal_code.map(str::to_string),
            municipality: municipality.map(str::to_string),
            country: "Portugal".to_string(),
            country_code: "PT".to_string(),
        }
    }

    #[test]
    fn test_free_text_with_postal_code() {
        let req = request("Rua das Flores 10", Some("1000-001"), Some("Lisboa"));
        assert_eq!(req.free_text(), "Rua das Flores 10, 1000-001, Portugal");
    }

    #[test]
    fn test_free_text_falls_back_to_municipality() {
        let req = request("", None, Some("Braga"));
        assert_eq!(req.free_text(), "Braga, Portugal");
        assert!(req.has_search_text());
    }

    #[test]
    fn test_empty_request_has_no_search_text() {
        assert!(!request("", None, None).has_search_text());
    }
}
