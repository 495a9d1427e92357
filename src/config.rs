//! Typed planner configuration, loadable from a JSON file.
//!
//! Every section has defaults, so a config file only needs the keys it
//! changes.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::budget::BudgetConfig;
use crate::error::{PlannerError, Result};
use crate::google::GoogleConfig;
use crate::nominatim::NominatimConfig;
use crate::optimizer::{HeuristicOptions, OptimizationParams};
use crate::osrm::OsrmConfig;
use crate::postal_lookup::PostalLookupConfig;
use crate::resolver::ResolverConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazetteerConfig {
    pub path: PathBuf,
}

impl Default for GazetteerConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/gazetteer.db"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceSource {
    #[default]
    Haversine,
    Osrm,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanningConfig {
    /// Minutes spent at each delivery when building schedules.
    pub service_minutes: f64,
    pub distance_source: DistanceSource,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            service_minutes: 15.0,
            distance_source: DistanceSource::Haversine,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub gazetteer: GazetteerConfig,
    pub resolver: ResolverConfig,
    pub nominatim: NominatimConfig,
    pub google: GoogleConfig,
    pub postal_lookup: PostalLookupConfig,
    pub budget: BudgetConfig,
    pub osrm: OsrmConfig,
    pub optimizer: OptimizationParams,
    pub heuristic: HeuristicOptions,
    pub planning: PlanningConfig,
}

impl PlannerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded planner config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let thresholds = &self.resolver.thresholds;
        if !(thresholds.exact >= thresholds.street
            && thresholds.street >= thresholds.postal_area
            && thresholds.postal_area >= thresholds.locality)
        {
            return Err(PlannerError::Config(
                "tier thresholds must be non-increasing from exact to locality".to_string(),
            ));
        }
        if self.resolver.candidate_limit == 0 {
            return Err(PlannerError::Config("candidate_limit must be positive".to_string()));
        }
        if self.planning.service_minutes < 0.0 || self.optimizer.service_minutes < 0.0 {
            return Err(PlannerError::Config("service minutes must not be negative".to_string()));
        }
        Ok(())
    }
}
