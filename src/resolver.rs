//! Waterfall address resolution.
//!
//! Tiers are tried cheapest first: local gazetteer, specialized postal
//! lookup, open geocoder, commercial geocoder. A later tier only replaces
//! the current best when its quality tier is strictly better, and the
//! cascade stops as soon as the best tier reaches the short-circuit tier.
//! Tier errors are logged and treated as "no result".

use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::address::{
    AddressQuery, BoundingBox, QualityTier, Source, normalize_address, portugal_bounds,
    postal_prefix, split_full_postal, within_regions,
};
use crate::budget::{CallStatus, UsageLedger};
use crate::config::PlannerConfig;
use crate::error::Result;
use crate::gazetteer::{GazetteerStore, SessionLog};
use crate::google::GoogleGeocoder;
use crate::nominatim::NominatimClient;
use crate::postal_lookup::PostalCodeDirectory;
use crate::traits::{GeocodeHit, GeocodeRequest, Geocoder, PostalSubdivisionLookup};

pub use crate::gazetteer::LearnedRecord;

/// Similarity score cut-offs for local matches (0..=100).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    /// At or above: tier 1.
    pub exact: f64,
    /// At or above: tier 2.
    pub street: f64,
    /// At or above: tier 4.
    pub postal_area: f64,
    /// At or above: tier 5.
    pub locality: f64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self {
            exact: 95.0,
            street: 85.0,
            postal_area: 70.0,
            locality: 50.0,
        }
    }
}

impl TierThresholds {
    /// Tier for a similarity score, `None` below the locality cut-off.
    pub fn tier_for(&self, score: f64) -> Option<QualityTier> {
        if score >= self.exact {
            Some(QualityTier::EXACT)
        } else if score >= self.street {
            Some(QualityTier::STREET)
        } else if score >= self.postal_area {
            Some(QualityTier::POSTAL_AREA)
        } else if score >= self.locality {
            Some(QualityTier::LOCALITY)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Country name appended to free-text queries.
    pub country: String,
    pub country_code: String,
    /// Results outside every region are rejected by the open geocoder tier.
    pub country_regions: Vec<BoundingBox>,
    /// Upper bound on gazetteer rows ranked per query.
    pub candidate_limit: usize,
    /// Stop the cascade once the best tier is at or below this.
    pub short_circuit_tier: QualityTier,
    pub thresholds: TierThresholds,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            country: "Portugal".to_string(),
            country_code: "PT".to_string(),
            country_regions: portugal_bounds(),
            candidate_limit: 500,
            short_circuit_tier: QualityTier::STREET,
            thresholds: TierThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMetadata {
    pub match_type: String,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolutionResult {
    /// (lat, lon), `None` when unresolved.
    pub coordinates: Option<(f64, f64)>,
    /// The query address after abbreviation expansion.
    pub normalized_address: String,
    /// Address text of the matched row or provider result.
    pub matched_address: Option<String>,
    pub quality_tier: QualityTier,
    pub source: Source,
    pub match_score: f64,
    pub provider_metadata: Option<ProviderMetadata>,
}

impl ResolutionResult {
    pub fn failed(normalized_address: String) -> Self {
        Self {
            coordinates: None,
            normalized_address,
            matched_address: None,
            quality_tier: QualityTier::UNRESOLVED,
            source: Source::Failed,
            match_score: 0.0,
            provider_metadata: None,
        }
    }

    fn from_hit(hit: &GeocodeHit, source: Source, normalized_address: &str) -> Self {
        Self {
            coordinates: Some(hit.coordinates),
            normalized_address: normalized_address.to_string(),
            matched_address: Some(hit.address.clone()),
            quality_tier: hit.quality_tier,
            source,
            match_score: 100.0,
            provider_metadata: Some(ProviderMetadata {
                match_type: hit.match_type.clone(),
                external_id: hit.external_id.clone(),
            }),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.coordinates.is_some() && self.quality_tier.is_resolved()
    }
}

/// Per-run state: the gazetteer connection and the usage ledger.
///
/// Opened once per batch run and closed when the run ends.
pub struct ResolverContext {
    pub gazetteer: GazetteerStore,
    pub usage: UsageLedger,
}

impl ResolverContext {
    pub fn new(gazetteer: GazetteerStore, usage: UsageLedger) -> Self {
        Self { gazetteer, usage }
    }

    pub fn open(config: &PlannerConfig) -> Result<Self> {
        Ok(Self {
            gazetteer: GazetteerStore::open(&config.gazetteer.path)?,
            usage: UsageLedger::new(config.budget.clone()),
        })
    }

    pub fn close(self) -> Result<()> {
        self.gazetteer.close()
    }
}

/// Results of one sequential batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    /// One result per query, in query order.
    pub results: Vec<ResolutionResult>,
    pub learned: Vec<LearnedRecord>,
    /// Rows actually written; 0 when the learn batch was rolled back.
    pub learned_persisted: usize,
    pub elapsed: Duration,
}

impl BatchOutcome {
    pub fn precise_count(&self) -> usize {
        self.results.iter().filter(|r| r.quality_tier.is_precise()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results.iter().filter(|r| !r.is_resolved()).count()
    }
}

pub struct AddressResolver {
    context: ResolverContext,
    config: ResolverConfig,
    postal_lookup: Option<Box<dyn PostalSubdivisionLookup>>,
    open_geocoder: Option<Box<dyn Geocoder>>,
    commercial_geocoder: Option<Box<dyn Geocoder>>,
}

impl AddressResolver {
    /// A resolver with only the local tier; attach external tiers with the
    /// `with_*` builders.
    pub fn new(context: ResolverContext, config: ResolverConfig) -> Self {
        Self {
            context,
            config,
            postal_lookup: None,
            open_geocoder: None,
            commercial_geocoder: None,
        }
    }

    /// Open the context and wire the HTTP tiers from configuration. The
    /// commercial tier is attached only when a credential is configured.
    pub fn from_config(config: &PlannerConfig) -> Result<Self> {
        let context = ResolverContext::open(config)?;
        let mut resolver = Self::new(context, config.resolver.clone())
            .with_postal_lookup(PostalCodeDirectory::new(&config.postal_lookup)?)
            .with_open_geocoder(NominatimClient::new(config.nominatim.clone())?);
        if let Some(google) = GoogleGeocoder::from_config(&config.google)? {
            resolver = resolver.with_commercial_geocoder(google);
        }
        Ok(resolver)
    }

    pub fn with_postal_lookup(mut self, lookup: impl PostalSubdivisionLookup + 'static) -> Self {
        self.postal_lookup = Some(Box::new(lookup));
        self
    }

    pub fn with_open_geocoder(mut self, geocoder: impl Geocoder + 'static) -> Self {
        self.open_geocoder = Some(Box::new(geocoder));
        self
    }

    pub fn with_commercial_geocoder(mut self, geocoder: impl Geocoder + 'static) -> Self {
        self.commercial_geocoder = Some(Box::new(geocoder));
        self
    }

    pub fn context(&self) -> &ResolverContext {
        &self.context
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// End the run and release the context.
    pub fn close(self) -> Result<()> {
        self.context.close()
    }

    /// Resolve one query. Never fails: the worst case is tier 8.
    pub fn resolve(&self, query: &AddressQuery) -> (ResolutionResult, Option<LearnedRecord>) {
        let normalized = normalize_address(&query.raw_text);
        let mut waterfall = Waterfall::new(query, &normalized);

        if let Some(local) = self.try_local(query, &normalized) {
            waterfall.offer(local);
        }
        if self.is_sufficient(waterfall.tier()) {
            return waterfall.finish();
        }

        if let Some((postal4, postal3)) = query.postal_code().and_then(split_full_postal) {
            if let Some(hit) = self.try_postal_lookup(postal4, postal3) {
                let mut result = ResolutionResult::from_hit(&hit, Source::SpecializedLookup, &normalized);
                result.quality_tier = QualityTier::EXACT;
                waterfall.offer_learnable(result, hit.address.clone());
            }
        }

        let request = GeocodeRequest {
            address: normalized.clone(),
            postal_code: query.postal_code().map(str::to_string),
            municipality: query.locality().map(str::to_string),
            country: self.config.country.clone(),
            country_code: self.config.country_code.clone(),
        };

        if !self.is_sufficient(waterfall.tier()) && request.has_search_text() {
            if let Some(hit) = self.try_open_geocoder(&request) {
                let result = ResolutionResult::from_hit(&hit, Source::OpenGeocoder, &normalized);
                waterfall.offer_learnable(result, normalized.clone());
            }
        }

        if !self.is_sufficient(waterfall.tier()) && request.has_search_text() {
            if let Some(hit) = self.try_commercial_geocoder(&request) {
                let result = ResolutionResult::from_hit(&hit, Source::CommercialGeocoder, &normalized);
                waterfall.offer_learnable(result, normalized.clone());
            }
        }

        waterfall.finish()
    }

    /// Resolve queries in order, then persist everything learned in one
    /// transaction and record the session.
    pub fn resolve_batch(&mut self, queries: &[AddressQuery]) -> BatchOutcome {
        let started = Instant::now();
        let mut results = Vec::with_capacity(queries.len());
        let mut learned = Vec::new();

        for query in queries {
            let (result, record) = self.resolve(query);
            results.push(result);
            learned.extend(record);
        }

        let learned_persisted = match self.context.gazetteer.learn_batch(&learned) {
            Ok(count) => count,
            Err(err) => {
                tracing::error!(error = %err, pending = learned.len(), "learn batch rolled back");
                0
            }
        };

        let outcome = BatchOutcome {
            results,
            learned,
            learned_persisted,
            elapsed: started.elapsed(),
        };

        let log = SessionLog {
            processed_at: Utc::now(),
            total_queries: queries.len(),
            elapsed_secs: outcome.elapsed.as_secs_f64(),
            learned_count: outcome.learned_persisted,
            precise_count: outcome.precise_count(),
            failed_count: outcome.failed_count(),
        };
        if let Err(err) = self.context.gazetteer.record_session(&log) {
            tracing::warn!(error = %err, "failed to record resolver session");
        }

        tracing::info!(
            total = log.total_queries,
            precise = log.precise_count,
            failed = log.failed_count,
            learned = log.learned_count,
            elapsed_secs = log.elapsed_secs,
            "batch resolved"
        );
        outcome
    }

    fn is_sufficient(&self, tier: QualityTier) -> bool {
        tier <= self.config.short_circuit_tier
    }

    fn try_local(&self, query: &AddressQuery, normalized: &str) -> Option<ResolutionResult> {
        let postal4 = query.postal_code().and_then(postal_prefix)?;

        let candidates = match self.context.gazetteer.lookup(
            postal4,
            query.locality(),
            self.config.candidate_limit,
        ) {
            Ok(candidates) => candidates,
            Err(err) => {
                tracing::warn!(error = %err, postal4, "local lookup failed");
                return None;
            }
        };

        let best = GazetteerStore::fuzzy_rank(&candidates, normalized).into_iter().next()?;
        let (tier, match_type) = match self.config.thresholds.tier_for(best.score) {
            Some(tier) => (tier, "FUZZY"),
            // the postal prefix itself is trustworthy even if the street is not
            None => (QualityTier::POSTAL_AREA, "POSTAL_FALLBACK"),
        };

        tracing::debug!(
            postal4,
            candidates = candidates.len(),
            score = best.score,
            tier = tier.value(),
            "local match"
        );

        Some(ResolutionResult {
            coordinates: Some(best.record.coordinates),
            normalized_address: normalized.to_string(),
            matched_address: Some(best.record.street_text.clone()),
            quality_tier: tier,
            source: Source::Local,
            match_score: best.score,
            provider_metadata: Some(ProviderMetadata {
                match_type: match_type.to_string(),
                external_id: best.record.external_id.clone(),
            }),
        })
    }

    fn try_postal_lookup(&self, postal4: &str, postal3: &str) -> Option<GeocodeHit> {
        let lookup = self.postal_lookup.as_ref()?;
        match lookup.lookup(postal4, postal3) {
            Ok(hit) => hit.filter(|hit| self.in_country(hit, "postal lookup")),
            Err(err) => {
                tracing::warn!(error = %err, postal4, postal3, "postal lookup failed");
                None
            }
        }
    }

    fn try_open_geocoder(&self, request: &GeocodeRequest) -> Option<GeocodeHit> {
        let geocoder = self.open_geocoder.as_ref()?;
        match geocoder.geocode(request) {
            Ok(hit) => hit.filter(|hit| self.in_country(hit, "open geocoder")),
            Err(err) => {
                tracing::warn!(error = %err, address = %request.address, "open geocoder failed");
                None
            }
        }
    }

    fn try_commercial_geocoder(&self, request: &GeocodeRequest) -> Option<GeocodeHit> {
        let geocoder = self.commercial_geocoder.as_ref()?;
        if !self.context.usage.has_quota() {
            return None;
        }

        let response = geocoder.geocode(request);
        let status = match &response {
            Ok(Some(_)) => CallStatus::Success,
            Ok(None) => CallStatus::ZeroResults,
            Err(_) => CallStatus::Error,
        };
        self.context.usage.record_call(&request.address, status);

        match response {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(error = %err, address = %request.address, "commercial geocoder failed");
                None
            }
        }
    }

    fn in_country(&self, hit: &GeocodeHit, tier: &str) -> bool {
        let (lat, lon) = hit.coordinates;
        let inside = within_regions(&self.config.country_regions, lat, lon);
        if !inside {
            tracing::debug!(tier, lat, lon, "result outside country bounds rejected");
        }
        inside
    }
}

/// Best-so-far bookkeeping for a single query.
struct Waterfall<'q> {
    query: &'q AddressQuery,
    normalized: &'q str,
    best: Option<ResolutionResult>,
    learned: Option<LearnedRecord>,
}

impl<'q> Waterfall<'q> {
    fn new(query: &'q AddressQuery, normalized: &'q str) -> Self {
        Self {
            query,
            normalized,
            best: None,
            learned: None,
        }
    }

    fn tier(&self) -> QualityTier {
        self.best
            .as_ref()
            .map(|best| best.quality_tier)
            .unwrap_or(QualityTier::UNRESOLVED)
    }

    /// Keep `result` if strictly better than the current best.
    fn offer(&mut self, result: ResolutionResult) -> bool {
        if !result.quality_tier.is_better_than(self.tier()) {
            return false;
        }
        self.best = Some(result);
        true
    }

    /// Like `offer`, and queue a learned record under `address` on success.
    fn offer_learnable(&mut self, result: ResolutionResult, address: String) {
        let learned = LearnedRecord {
            address,
            coordinates: result.coordinates.unwrap_or_default(),
            quality_tier: result.quality_tier,
            source: result.source,
            match_type: result
                .provider_metadata
                .as_ref()
                .map(|meta| meta.match_type.clone())
                .unwrap_or_default(),
            external_id: result
                .provider_metadata
                .as_ref()
                .and_then(|meta| meta.external_id.clone()),
            postal_code: self.query.postal_code().map(str::to_string),
            municipality: self.query.locality().map(str::to_string),
        };
        if self.offer(result) {
            self.learned = Some(learned);
        }
    }

    fn finish(self) -> (ResolutionResult, Option<LearnedRecord>) {
        match self.best {
            Some(best) => (best, self.learned),
            None => (ResolutionResult::failed(self.normalized.to_string()), None),
        }
    }
}
