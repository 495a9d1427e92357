//! Routing tests
//!
//! Heuristic geometry, constrained feasibility, diagnostics and schedules
//! over small planar problems and Lisbon fixtures.

mod fixtures;

use geo_vrp_planner::diagnostics::{InfeasibilityCause, diagnose};
use geo_vrp_planner::heuristic::{nearest_neighbor_tour, tour_distance, two_opt};
use geo_vrp_planner::schedule::schedule_route;
use geo_vrp_planner::{
    HeuristicOptions, OptimizationParams, PlannerError, RouteOptimizer, RouteSolution, RoutingProblem, SolveStatus,
    Strategy, TimeWindow, Vehicle,
};

use fixtures::{DELIVERIES, ProblemBuilder, WAREHOUSES, euclidean_matrix};

// ============================================================================
// Test Fixtures
// ============================================================================

/// Bounded search so tests finish quickly and deterministically.
fn quick_params() -> OptimizationParams {
    OptimizationParams {
        search_time_limit_ms: 2_000,
        max_iterations: Some(100),
        seed: 7,
        ..OptimizationParams::default()
    }
}

fn solve(problem: &RoutingProblem, strategy: Strategy) -> RouteSolution {
    RouteOptimizer::new(quick_params())
        .solve(problem, strategy)
        .unwrap()
}

/// Depot at the origin plus the four corners of the unit square.
fn unit_square() -> RoutingProblem {
    let points = [(0.0, 0.0), (0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)];
    RoutingProblem::new(
        euclidean_matrix(&points),
        vec![0.0, 1.0, 1.0, 1.0, 1.0],
        vec![Vehicle::new("van", 10.0)],
    )
}

fn is_self_crossing_square(stops: &[usize]) -> bool {
    // diagonals (0,0)-(1,1) and (0,1)-(1,0) both used
    let uses = |a: usize, b: usize| {
        stops
            .windows(2)
            .any(|leg| (leg[0] == a && leg[1] == b) || (leg[0] == b && leg[1] == a))
    };
    uses(2, 4) && (uses(1, 3) || uses(0, 3))
}

// ============================================================================
// Heuristic
// ============================================================================

#[test]
fn test_unit_square_returns_perimeter() {
    let problem = unit_square();
    let solution = solve(&problem, Strategy::Heuristic);

    assert_eq!(solution.status, SolveStatus::Success);
    assert_eq!(solution.routes.len(), 1);
    assert!((solution.total_distance - 4.0).abs() < 1e-9);
    assert!(!is_self_crossing_square(&solution.routes[0].stops));
}

#[test]
fn test_two_opt_untangles_crossing_tour() {
    let problem = unit_square();
    let crossing = vec![0, 1, 3, 2, 4, 0];
    let before = tour_distance(&problem.distance_matrix, &crossing);

    let improved = two_opt(&problem.distance_matrix, crossing);

    assert!(before > 4.5);
    assert!((tour_distance(&problem.distance_matrix, &improved) - 4.0).abs() < 1e-9);
    assert_eq!(improved.first(), Some(&0));
    assert_eq!(improved.last(), Some(&0));
}

#[test]
fn test_two_opt_never_lengthens_a_tour() {
    let problem = ProblemBuilder::new(&WAREHOUSES[0])
        .stops(DELIVERIES, 1.0)
        .vehicle("van", 100.0)
        .build();
    let nodes: Vec<usize> = (1..problem.len()).collect();

    let tour = nearest_neighbor_tour(&problem.distance_matrix, 0, &nodes);
    let before = tour_distance(&problem.distance_matrix, &tour);
    let after = tour_distance(&problem.distance_matrix, &two_opt(&problem.distance_matrix, tour));

    assert!(after <= before + 1e-9);
}

#[test]
fn test_heuristic_splits_deliveries_across_vehicles() {
    let problem = ProblemBuilder::new(&WAREHOUSES[0])
        .stops(&DELIVERIES[..5], 10.0)
        .vehicle("van-1", 100.0)
        .vehicle("van-2", 100.0)
        .build();
    let solution = solve(&problem, Strategy::Heuristic);

    let sizes: Vec<usize> = solution.routes.iter().map(|r| r.deliveries().len()).collect();
    assert_eq!(sizes, vec![3, 2]);
    assert_eq!(solution.per_route_load, vec![30.0, 20.0]);
}

#[test]
fn test_heuristic_drops_vehicles_without_stops() {
    let problem = ProblemBuilder::new(&WAREHOUSES[0])
        .stop(&DELIVERIES[0], 1.0)
        .vehicle("van-1", 10.0)
        .vehicle("van-2", 10.0)
        .build();
    let solution = solve(&problem, Strategy::Heuristic);

    assert_eq!(solution.routes.len(), 1);
    assert_eq!(solution.routes[0].vehicle_id, "van-1");
    assert_eq!(solution.routes[0].stops, vec![0, 1, 0]);
}

fn shuffled(problem: &RoutingProblem, seed: u64) -> RouteSolution {
    RouteOptimizer::new(quick_params())
        .with_heuristic_options(HeuristicOptions {
            randomize: true,
            seed,
        })
        .solve(problem, Strategy::Heuristic)
        .unwrap()
}

#[test]
fn test_shuffled_heuristic_visits_every_delivery_once() {
    let problem = ProblemBuilder::new(&WAREHOUSES[0])
        .stops(DELIVERIES, 1.0)
        .vehicle("van-1", 100.0)
        .vehicle("van-2", 100.0)
        .vehicle("van-3", 100.0)
        .build();

    for seed in [1, 42, 9_001] {
        let solution = shuffled(&problem, seed);
        let mut visited: Vec<usize> = solution
            .routes
            .iter()
            .flat_map(|r| r.deliveries().to_vec())
            .collect();
        visited.sort();

        assert_eq!(visited, (1..=DELIVERIES.len()).collect::<Vec<_>>());
        let sizes: Vec<usize> = solution.routes.iter().map(|r| r.deliveries().len()).collect();
        assert_eq!(sizes, vec![4, 4, 4]);
    }
}

#[test]
fn test_shuffled_heuristic_is_deterministic_per_seed() {
    let problem = ProblemBuilder::new(&WAREHOUSES[0])
        .stops(DELIVERIES, 1.0)
        .vehicle("van-1", 100.0)
        .vehicle("van-2", 100.0)
        .build();

    assert_eq!(shuffled(&problem, 42), shuffled(&problem, 42));
}

// ============================================================================
// Constrained solver
// ============================================================================

#[test]
fn test_constrained_respects_capacity() {
    let problem = ProblemBuilder::new(&WAREHOUSES[0])
        .stops(&DELIVERIES[..6], 40.0)
        .vehicle("van-1", 120.0)
        .vehicle("van-2", 120.0)
        .build();
    let solution = solve(&problem, Strategy::Constrained);

    assert!(solution.is_success());
    assert!(solution.per_route_load.iter().all(|&load| load <= 120.0));

    let mut served: Vec<usize> = solution
        .routes
        .iter()
        .flat_map(|r| r.deliveries().to_vec())
        .collect();
    served.sort_unstable();
    assert_eq!(served, (1..=6).collect::<Vec<_>>());
}

#[test]
fn test_constrained_routes_start_and_end_at_depot() {
    let problem = ProblemBuilder::new(&WAREHOUSES[1])
        .stops(&DELIVERIES[..4], 5.0)
        .vehicle("van", 50.0)
        .build();
    let solution = solve(&problem, Strategy::Constrained);

    let route = &solution.routes[0];
    assert_eq!(route.stops.first(), Some(&0));
    assert_eq!(route.stops.last(), Some(&0));
    assert!((solution.total_distance - problem.path_distance(&route.stops)).abs() < 1e-9);
}

#[test]
fn test_capacity_shortfall_is_no_solution_and_diagnosed() {
    let problem = ProblemBuilder::new(&WAREHOUSES[0])
        .stops(&DELIVERIES[..4], 250.0)
        .vehicle("truck-1", 300.0)
        .vehicle("truck-2", 300.0)
        .build();
    let solution = solve(&problem, Strategy::Constrained);

    assert_eq!(solution.status, SolveStatus::NoSolution);
    assert!(solution.routes.is_empty());

    let causes = diagnose(&problem, &quick_params());
    assert_eq!(
        causes[0],
        InfeasibilityCause::CapacityShortfall {
            total_demand: 1000.0,
            total_capacity: 600.0,
            shortfall: 400.0,
        }
    );
}

#[test]
fn test_oversized_delivery_is_no_solution() {
    let problem = ProblemBuilder::new(&WAREHOUSES[0])
        .stop(&DELIVERIES[0], 10.0)
        .stop(&DELIVERIES[1], 500.0)
        .vehicle("van", 400.0)
        .vehicle("bike", 50.0)
        .build();

    let solution = solve(&problem, Strategy::Constrained);
    assert_eq!(solution.status, SolveStatus::NoSolution);
    assert!(diagnose(&problem, &quick_params())
        .iter()
        .any(|cause| matches!(cause, InfeasibilityCause::OversizedDemand { .. })));
}

#[test]
fn test_time_windows_are_met_in_schedule() {
    let problem = ProblemBuilder::new(&WAREHOUSES[0])
        .stop_within(&DELIVERIES[0], 1.0, TimeWindow::new(600.0, 660.0))
        .stop_within(&DELIVERIES[4], 1.0, TimeWindow::new(480.0, 540.0))
        .stop(&DELIVERIES[6], 1.0)
        .vehicle("van", 10.0)
        .build();
    let params = quick_params();
    let solution = RouteOptimizer::new(params.clone())
        .solve(&problem, Strategy::Constrained)
        .unwrap();

    assert!(solution.is_success());
    for plan in &solution.routes {
        let schedule = schedule_route(plan, &problem, params.service_minutes);
        for stop in &schedule.stops {
            if let Some(window) = problem.time_window(stop.location) {
                assert!(window.contains(stop.arrival), "stop {} outside its window", stop.location);
            }
        }
    }
}

#[test]
fn test_unreachable_time_window_is_no_solution() {
    let problem = ProblemBuilder::new(&WAREHOUSES[0])
        .stop_within(&DELIVERIES[3], 1.0, TimeWindow::new(480.0, 481.0))
        .stop(&DELIVERIES[0], 1.0)
        .vehicle("van", 10.0)
        .build();

    let solution = solve(&problem, Strategy::Constrained);
    assert_eq!(solution.status, SolveStatus::NoSolution);
}

#[test]
fn test_unreachable_distance_blocks_assignment() {
    let mut matrix = euclidean_matrix(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]);
    matrix[0][2] = f64::INFINITY;
    matrix[2][0] = f64::INFINITY;
    matrix[1][2] = f64::INFINITY;
    matrix[2][1] = f64::INFINITY;
    let problem = RoutingProblem::new(matrix, vec![0.0, 1.0, 1.0], vec![Vehicle::new("van", 10.0)]);

    let solution = solve(&problem, Strategy::Constrained);
    assert_eq!(solution.status, SolveStatus::NoSolution);
}

#[test]
fn test_malformed_problem_is_an_error() {
    let mut problem = unit_square();
    problem.demand.pop();

    let err = RouteOptimizer::new(quick_params())
        .solve(&problem, Strategy::Constrained)
        .unwrap_err();
    assert!(matches!(err, PlannerError::InvalidProblem(_)));
}

#[test]
fn test_strategy_parsing() {
    assert_eq!("heuristic".parse::<Strategy>().unwrap(), Strategy::Heuristic);
    assert_eq!("CONSTRAINED".parse::<Strategy>().unwrap(), Strategy::Constrained);
    assert!("genetic".parse::<Strategy>().is_err());
}
