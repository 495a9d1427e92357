//! Failure classification and fallback route tests.

mod fixtures;

use pretty_assertions::assert_eq;

use geo_vrp_planner::failure::{FailureReason, classify, fallback_route};
use geo_vrp_planner::resolver::ResolutionResult;
use geo_vrp_planner::{AddressQuery, QualityTier, Source};

use fixtures::{DELIVERIES, WAREHOUSES, query};

// ============================================================================
// Test Fixtures
// ============================================================================

fn resolved(location: (f64, f64)) -> ResolutionResult {
    ResolutionResult {
        coordinates: Some(location),
        quality_tier: QualityTier::STREET,
        source: Source::Local,
        match_score: 90.0,
        ..ResolutionResult::failed("resolved".to_string())
    }
}

fn failed(query: &AddressQuery) -> ResolutionResult {
    ResolutionResult::failed(query.raw_text.clone())
}

/// A batch of three failures and one success, in mixed order.
fn mixed_batch() -> (Vec<AddressQuery>, Vec<ResolutionResult>) {
    let queries = vec![
        query("Rua Augusta 1", "1100-048", "Lisboa"),
        query("Rua Inexistente 5", "9999-999", "Lisboa"),
        query("", "", ""),
        query("Rua do Ouro 3", "1100-060", "Lisboa"),
    ];
    let results = vec![
        resolved(DELIVERIES[0].coords()),
        failed(&queries[1]),
        failed(&queries[2]),
        failed(&queries[3]),
    ];
    (queries, results)
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn test_nonexistent_postal_code_regardless_of_address() {
    for address in ["Rua Augusta 1", "Avenida da Liberdade 100", "x", "", "nan"] {
        let q = query(address, "9999-999", "Lisboa");
        assert_eq!(FailureReason::for_query(&q), FailureReason::PostalCodeNonexistent);
    }
    assert_eq!(FailureReason::PostalCodeNonexistent.as_str(), "postal code does not exist");
}

#[test]
fn test_classify_counts_reasons() {
    let (queries, results) = mixed_batch();
    let report = classify(&queries, &results);

    assert_eq!(report.total, 4);
    assert_eq!(report.success_count, 1);
    assert_eq!(report.failure_count, 3);
    assert_eq!(report.success_rate(), 25.0);
    assert_eq!(report.failure_rate(), 75.0);

    let reasons: Vec<(usize, FailureReason)> =
        report.details.iter().map(|d| (d.index, d.reason)).collect();
    assert_eq!(
        reasons,
        vec![
            (1, FailureReason::PostalCodeNonexistent),
            (2, FailureReason::AllFieldsEmpty),
            (3, FailureReason::NotFound),
        ]
    );
    assert_eq!(report.reason_counts[&FailureReason::NotFound], 1);
}

#[test]
fn test_summary_lists_reasons() {
    let (queries, results) = mixed_batch();
    let summary = classify(&queries, &results).summary();

    assert!(summary.contains("processed: 4"));
    assert!(summary.contains("failed:    3 (75.0%)"));
    assert!(summary.contains("1 x all fields empty"));
    assert!(summary.contains("1 x postal code does not exist"));
}

#[test]
fn test_fully_resolved_batch_has_no_details() {
    let queries = vec![query("Rua Augusta 1", "1100-048", "Lisboa")];
    let report = classify(&queries, &[resolved(DELIVERIES[0].coords())]);

    assert_eq!(report.failure_count, 0);
    assert!(report.details.is_empty());
    assert!(!report.summary().contains("Failure reasons"));
}

// ============================================================================
// Fallback route
// ============================================================================

#[test]
fn test_fallback_route_holds_failures_at_depot() {
    let (queries, results) = mixed_batch();
    let depot = WAREHOUSES[0].coords();
    let route = fallback_route(&queries, &results, depot);

    let indices: Vec<usize> = route.stops.iter().map(|s| s.query_index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert!(route.stops.iter().all(|s| s.approximate && s.coordinates == depot));
    assert_eq!(route.stops[0].address, "Rua Inexistente 5");
    assert!(!route.warning.is_empty());
}

#[test]
fn test_fallback_route_empty_when_all_resolved() {
    let queries = vec![query("Rua Augusta 1", "1100-048", "Lisboa")];
    let route = fallback_route(&queries, &[resolved(DELIVERIES[0].coords())], WAREHOUSES[0].coords());
    assert!(route.is_empty());
}
