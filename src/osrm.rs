//! OSRM HTTP adapter for road distances and route geometry.

use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::polyline::{OSRM_PRECISION, Polyline};
use crate::traits::{DistanceMatrix, DistanceMatrixProvider};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OsrmConfig {
    pub base_url: String,
    pub profile: String,
    pub timeout_secs: u64,
}

impl Default for OsrmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000".to_string(),
            profile: "car".to_string(),
            timeout_secs: 10,
        }
    }
}

/// A road route through an ordered list of locations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoadRoute {
    pub geometry: Polyline,
    pub duration_secs: f64,
    pub distance_km: f64,
}

#[derive(Debug, Clone)]
pub struct OsrmClient {
    config: OsrmConfig,
    client: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(config: OsrmConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self { config, client })
    }

    /// Driving route visiting `locations` in order.
    pub fn route(&self, locations: &[(f64, f64)]) -> Result<RoadRoute> {
        if locations.len() < 2 {
            return Err(osrm_error("a route needs at least two locations".to_string()));
        }

        let url = format!(
            "{}/route/v1/{}/{}?overview=full&geometries=polyline",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            coordinate_path(locations)
        );

        let body = self
            .client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<OsrmRouteResponse>())?;

        let route = body.check()?.routes.into_iter().next().ok_or_else(|| {
            osrm_error("route response contained no routes".to_string())
        })?;

        Ok(RoadRoute {
            geometry: Polyline::decode(&route.geometry, OSRM_PRECISION)?,
            duration_secs: route.duration,
            distance_km: route.distance / 1000.0,
        })
    }
}

impl DistanceMatrixProvider for OsrmClient {
    fn matrix_for(&self, locations: &[(f64, f64)]) -> Result<DistanceMatrix> {
        if locations.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/table/v1/{}/{}?annotations=distance",
            self.config.base_url.trim_end_matches('/'),
            self.config.profile,
            coordinate_path(locations)
        );

        let body = self
            .client
            .get(url)
            .send()
            .and_then(|resp| resp.error_for_status())
            .and_then(|resp| resp.json::<OsrmTableResponse>())?;

        let distances = body
            .check()?
            .distances
            .ok_or_else(|| osrm_error("table response has no distances".to_string()))?;

        if distances.len() != locations.len() {
            return Err(osrm_error(format!(
                "table has {} rows for {} locations",
                distances.len(),
                locations.len()
            )));
        }

        // unreachable pairs come back as null
        let matrix = distances
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|metres| metres.map_or(f64::INFINITY, |m| m / 1000.0))
                    .collect()
            })
            .collect();

        tracing::debug!(locations = locations.len(), "fetched osrm distance table");
        Ok(matrix)
    }
}

/// OSRM expects `lon,lat` pairs joined by `;`.
fn coordinate_path(locations: &[(f64, f64)]) -> String {
    locations
        .iter()
        .map(|(lat, lng)| format!("{:.6},{:.6}", lng, lat))
        .collect::<Vec<_>>()
        .join(";")
}

fn osrm_error(message: String) -> PlannerError {
    PlannerError::Provider {
        provider: "osrm",
        message,
    }
}

trait OsrmStatus: Sized {
    fn code(&self) -> &str;
    fn message(&self) -> Option<&str>;

    fn check(self) -> Result<Self> {
        if self.code() == "Ok" {
            Ok(self)
        } else {
            Err(osrm_error(format!(
                "{}: {}",
                self.code(),
                self.message().unwrap_or_default()
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct OsrmTableResponse {
    code: String,
    message: Option<String>,
    distances: Option<Vec<Vec<Option<f64>>>>,
}

impl OsrmStatus for OsrmTableResponse {
    fn code(&self) -> &str {
        &self.code
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}

#[derive(Debug, Deserialize)]
struct OsrmRouteResponse {
    code: String,
    message: Option<String>,
    #[serde(default)]
    routes: Vec<OsrmRoute>,
}

#[derive(Debug, Deserialize)]
struct OsrmRoute {
    geometry: String,
    duration: f64,
    distance: f64,
}

impl OsrmStatus for OsrmRouteResponse {
    fn code(&self) -> &str {
        &self.code
    }

    fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }
}
