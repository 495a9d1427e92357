//! Specialized full-postal-code lookup (codigo-postal.pt result page).
//!
//! A 7-digit code usually names a single street segment, so a page hit is
//! treated as exact.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::address::QualityTier;
use crate::error::Result;
use crate::traits::{GeocodeHit, PostalSubdivisionLookup};

static GPS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"GPS:</b>\s*(-?\d+\.\d+),\s*(-?\d+\.\d+)").expect("valid gps regex")
});

static TITLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<a\s+[^>]*class=['"]search-title['"][^>]*>(.*?)</a>"#)
        .expect("valid title regex")
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostalLookupConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for PostalLookupConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.codigo-postal.pt/".to_string(),
            user_agent: concat!("geo-vrp-planner/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostalCodeDirectory {
    base_url: String,
    client: reqwest::blocking::Client,
}

impl PostalCodeDirectory {
    pub fn new(config: &PostalLookupConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            base_url: config.base_url.clone(),
            client,
        })
    }
}

impl PostalSubdivisionLookup for PostalCodeDirectory {
    fn lookup(&self, postal4: &str, postal3: &str) -> Result<Option<GeocodeHit>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("cp4", postal4), ("cp3", postal3)])
            .send()?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), postal4, postal3, "postal page unavailable");
            return Ok(None);
        }

        Ok(parse_result_page(&response.text()?))
    }
}

/// Extract the first result's coordinates and title from a result page.
pub fn parse_result_page(html: &str) -> Option<GeocodeHit> {
    let gps = GPS.captures(html)?;
    let title = TITLE.captures(html)?;

    let lat = gps.get(1)?.as_str().parse::<f64>().ok()?;
    let lon = gps.get(2)?.as_str().parse::<f64>().ok()?;
    let address = title.get(1)?.as_str().trim().to_string();
    if address.is_empty() {
        return None;
    }

    Some(GeocodeHit {
        coordinates: (lat, lon),
        address,
        quality_tier: QualityTier::EXACT,
        match_type: "EXACT_POSTAL_CODE".to_string(),
        external_id: None,
    })
}
