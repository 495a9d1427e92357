//! Reporting on queries the resolver could not place, and the explicit
//! fallback route that keeps them visible to dispatch.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;

use crate::address::AddressQuery;
use crate::resolver::ResolutionResult;

/// Why a query ended unresolved, judged from its input fields only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AllFieldsEmpty,
    AddressEmpty,
    PostalCodeEmpty,
    PostalCodeTooShort,
    PostalCodeNonexistent,
    PostalCodeMalformed,
    MunicipalityEmpty,
    NotFound,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllFieldsEmpty => "all fields empty",
            Self::AddressEmpty => "address empty",
            Self::PostalCodeEmpty => "postal code empty",
            Self::PostalCodeTooShort => "postal code too short",
            Self::PostalCodeNonexistent => "postal code does not exist",
            Self::PostalCodeMalformed => "postal code malformed",
            Self::MunicipalityEmpty => "municipality empty",
            Self::NotFound => "address not found in any source",
        }
    }

    /// First reason that applies to `query`, in fixed priority order.
    pub fn for_query(query: &AddressQuery) -> Self {
        let address = field(Some(&query.raw_text));
        let postal = field(query.postal_code.as_deref());
        let municipality = field(query.locality.as_deref());

        if address.is_none() && postal.is_none() && municipality.is_none() {
            return Self::AllFieldsEmpty;
        }
        // a postal code that is present but invalid outranks a missing address
        if let Some(reason) = postal.and_then(postal_code_problem) {
            return reason;
        }
        if address.is_none() {
            return Self::AddressEmpty;
        }
        if postal.is_none() {
            return Self::PostalCodeEmpty;
        }
        if municipality.is_none() {
            return Self::MunicipalityEmpty;
        }
        Self::NotFound
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trimmed value, treating blanks and spreadsheet null markers as absent.
fn field(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| {
        !v.is_empty() && !v.eq_ignore_ascii_case("nan") && !v.eq_ignore_ascii_case("none")
    })
}

fn postal_code_problem(code: &str) -> Option<FailureReason> {
    let digits: String = code.chars().filter(|c| *c != '-' && *c != ' ').collect();
    if digits.chars().count() < 4 {
        return Some(FailureReason::PostalCodeTooShort);
    }
    if digits.starts_with("0000") || digits.starts_with("9999") {
        return Some(FailureReason::PostalCodeNonexistent);
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Some(FailureReason::PostalCodeMalformed);
    }
    None
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureDetail {
    /// Position of the query in the batch.
    pub index: usize,
    pub query: AddressQuery,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureReport {
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub reason_counts: BTreeMap<FailureReason, usize>,
    pub details: Vec<FailureDetail>,
}

impl FailureReport {
    /// Percentage of resolved queries, 0 for an empty batch.
    pub fn success_rate(&self) -> f64 {
        percentage(self.success_count, self.total)
    }

    pub fn failure_rate(&self) -> f64 {
        percentage(self.failure_count, self.total)
    }

    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Resolution summary");
        let _ = writeln!(out, "  processed: {}", self.total);
        let _ = writeln!(out, "  resolved:  {} ({:.1}%)", self.success_count, self.success_rate());
        let _ = writeln!(out, "  failed:    {} ({:.1}%)", self.failure_count, self.failure_rate());
        if !self.reason_counts.is_empty() {
            let _ = writeln!(out, "Failure reasons");
            for (reason, count) in &self.reason_counts {
                let _ = writeln!(out, "  {count} x {reason}");
            }
        }
        out
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

/// Classify every unresolved (tier 8) result. Queries and results are
/// paired by position.
pub fn classify(queries: &[AddressQuery], results: &[ResolutionResult]) -> FailureReport {
    let mut report = FailureReport {
        total: 0,
        success_count: 0,
        failure_count: 0,
        reason_counts: BTreeMap::new(),
        details: Vec::new(),
    };

    for (index, (query, result)) in queries.iter().zip(results).enumerate() {
        report.total += 1;
        if result.is_resolved() {
            report.success_count += 1;
            continue;
        }

        let reason = FailureReason::for_query(query);
        report.failure_count += 1;
        *report.reason_counts.entry(reason).or_default() += 1;
        report.details.push(FailureDetail {
            index,
            query: query.clone(),
            reason,
        });
    }

    if report.failure_count > 0 {
        tracing::info!(
            failed = report.failure_count,
            total = report.total,
            "unresolved queries classified"
        );
    }
    report
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackStop {
    pub query_index: usize,
    pub address: String,
    /// Placeholder: the depot's own coordinates.
    pub coordinates: (f64, f64),
    pub approximate: bool,
}

/// Non-optimized pseudo route holding every unresolved query at the depot.
/// Never fed into a distance matrix.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FallbackRoute {
    pub label: String,
    pub warning: String,
    pub stops: Vec<FallbackStop>,
}

impl FallbackRoute {
    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }
}

pub fn fallback_route(
    queries: &[AddressQuery],
    results: &[ResolutionResult],
    depot: (f64, f64),
) -> FallbackRoute {
    let stops = queries
        .iter()
        .zip(results)
        .enumerate()
        .filter(|(_, (_, result))| !result.is_resolved())
        .map(|(query_index, (query, _))| FallbackStop {
            query_index,
            address: query.raw_text.clone(),
            coordinates: depot,
            approximate: true,
        })
        .collect();

    FallbackRoute {
        label: "pending address validation".to_string(),
        warning: "stops were not geocoded; coordinates are the depot's".to_string(),
        stops,
    }
}
