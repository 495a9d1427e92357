//! Commercial geocoding tier (Google Geocoding API).
//!
//! Budget accounting is not done here; the resolver records every call in
//! its usage ledger.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::address::QualityTier;
use crate::error::{PlannerError, Result};
use crate::traits::{GeocodeHit, GeocodeRequest, Geocoder};

/// Placeholder left in config templates; treated as "no credential".
const PLACEHOLDER_KEY: &str = "YOUR_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://maps.googleapis.com/maps/api/geocode/json".to_string(),
            api_key: None,
            timeout_secs: 10,
        }
    }
}

impl GoogleConfig {
    /// The configured key, if it is a usable credential.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty() && *key != PLACEHOLDER_KEY)
    }
}

#[derive(Debug, Clone)]
pub struct GoogleGeocoder {
    base_url: String,
    api_key: String,
    client: reqwest::blocking::Client,
}

impl GoogleGeocoder {
    /// Build a client, or `None` when no credential is configured.
    pub fn from_config(config: &GoogleConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.credential() else {
            return Ok(None);
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Some(Self {
            base_url: config.base_url.clone(),
            api_key: api_key.to_string(),
            client,
        }))
    }
}

/// `components` filter restricting results to the country and, when known,
/// the postal code and municipality.
pub fn components_filter(request: &GeocodeRequest) -> String {
    let mut components = vec![format!("country:{}", request.country_code)];
    if let Some(postal_code) = request.postal_code.as_deref() {
        components.push(format!("postal_code:{postal_code}"));
    }
    if let Some(municipality) = request.municipality.as_deref() {
        components.push(format!("administrative_area:{municipality}"));
    }
    components.join("|")
}

impl Geocoder for GoogleGeocoder {
    fn geocode(&self, request: &GeocodeRequest) -> Result<Option<GeocodeHit>> {
        let body = self
            .client
            .get(&self.base_url)
            .query(&[
                ("address", request.address.as_str()),
                ("components", components_filter(request).as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<GeocodeResponse>())?;

        body.into_hit()
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
    geometry: Geometry,
    #[serde(default)]
    types: Vec<String>,
    place_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
    location_type: String,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl GeocodeResponse {
    fn into_hit(self) -> Result<Option<GeocodeHit>> {
        match self.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => return Ok(None),
            other => {
                return Err(PlannerError::Provider {
                    provider: "google",
                    message: format!(
                        "{other}: {}",
                        self.error_message.unwrap_or_default()
                    ),
                });
            }
        }

        Ok(self.results.into_iter().next().map(|result| GeocodeHit {
            coordinates: (result.geometry.location.lat, result.geometry.location.lng),
            quality_tier: tier_for_result(&result.geometry.location_type, &result.types),
            address: result.formatted_address,
            match_type: result.geometry.location_type,
            external_id: result.place_id,
        }))
    }
}

/// Map location type and result types to a quality tier.
pub fn tier_for_result(location_type: &str, types: &[String]) -> QualityTier {
    let has = |kind: &str| types.iter().any(|t| t == kind);
    if matches!(location_type, "ROOFTOP" | "RANGE_INTERPOLATED") {
        QualityTier::EXACT
    } else if has("street_address") || has("route") {
        QualityTier::STREET
    } else if has("postal_code") {
        QualityTier::POSTAL_AREA
    } else if has("locality") || has("neighborhood") {
        QualityTier::LOCALITY
    } else if has("administrative_area_level_2") {
        QualityTier::MUNICIPALITY
    } else if has("administrative_area_level_1") {
        QualityTier::REGION
    } else {
        QualityTier::LOCALITY
    }
}
