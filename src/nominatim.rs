//! Open geocoding tier (Nominatim HTTP API).

use std::cell::Cell;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::address::QualityTier;
use crate::error::{PlannerError, Result};
use crate::traits::{GeocodeHit, GeocodeRequest, Geocoder};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NominatimConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
    /// Minimum spacing between consecutive calls.
    pub politeness_delay_ms: u64,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: concat!("geo-vrp-planner/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 5,
            politeness_delay_ms: 1100,
        }
    }
}

#[derive(Debug)]
pub struct NominatimClient {
    config: NominatimConfig,
    client: reqwest::blocking::Client,
    last_call: Cell<Option<Instant>>,
}

impl NominatimClient {
    pub fn new(config: NominatimConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            config,
            client,
            last_call: Cell::new(None),
        })
    }

    /// Sleep until the politeness delay since the previous call has passed.
    fn wait_for_slot(&self) {
        let delay = Duration::from_millis(self.config.politeness_delay_ms);
        if let Some(last) = self.last_call.get() {
            let elapsed = last.elapsed();
            if elapsed < delay {
                std::thread::sleep(delay - elapsed);
            }
        }
        self.last_call.set(Some(Instant::now()));
    }
}

impl Geocoder for NominatimClient {
    fn geocode(&self, request: &GeocodeRequest) -> Result<Option<GeocodeHit>> {
        self.wait_for_slot();

        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let places: Vec<NominatimPlace> = self
            .client
            .get(url)
            .query(&[
                ("q", request.free_text().as_str()),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("limit", "1"),
            ])
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<Vec<NominatimPlace>>())?;

        places.into_iter().next().map(NominatimPlace::into_hit).transpose()
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(rename = "type")]
    kind: Option<String>,
    place_id: Option<u64>,
    #[serde(default)]
    address: HashMap<String, String>,
}

impl NominatimPlace {
    fn into_hit(self) -> Result<GeocodeHit> {
        let parse = |value: &str| {
            value.parse::<f64>().map_err(|err| PlannerError::Provider {
                provider: "nominatim",
                message: format!("bad coordinate '{value}': {err}"),
            })
        };
        Ok(GeocodeHit {
            coordinates: (parse(&self.lat)?, parse(&self.lon)?),
            quality_tier: tier_for_address(&self.address),
            address: self.display_name,
            match_type: self.kind.unwrap_or_else(|| "unknown".to_string()),
            external_id: self.place_id.map(|id| id.to_string()),
        })
    }
}

/// Map the most specific address component present to a quality tier.
pub fn tier_for_address(details: &HashMap<String, String>) -> QualityTier {
    let has = |key: &str| details.contains_key(key);
    if has("house_number") {
        QualityTier::EXACT
    } else if has("road") {
        QualityTier::STREET
    } else if has("postcode") {
        QualityTier::POSTAL_AREA
    } else if has("city") || has("town") || has("village") {
        QualityTier::LOCALITY
    } else if has("county") || has("municipality") {
        QualityTier::MUNICIPALITY
    } else if has("state") || has("region") {
        QualityTier::REGION
    } else {
        QualityTier::LOCALITY
    }
}
