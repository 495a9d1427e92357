//! Likely causes of an infeasible routing problem, derived from the input
//! alone without re-solving.

use std::fmt;

use serde::Serialize;

use crate::optimizer::{OptimizationParams, RoutingProblem};

/// Shortest maximum route duration (minutes) considered workable.
pub const MIN_SANE_ROUTE_MINUTES: f64 = 120.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum InfeasibilityCause {
    CapacityShortfall {
        total_demand: f64,
        total_capacity: f64,
        shortfall: f64,
    },
    OversizedDemand {
        largest_demand: f64,
        largest_capacity: f64,
    },
    RouteDurationTooShort {
        configured_minutes: f64,
        minimum_minutes: f64,
    },
    MoreVehiclesThanDeliveries {
        vehicles: usize,
        deliveries: usize,
    },
}

impl fmt::Display for InfeasibilityCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapacityShortfall {
                total_demand,
                total_capacity,
                shortfall,
            } => write!(
                f,
                "fleet capacity {total_capacity:.0} is below total demand {total_demand:.0} (short by {shortfall:.0})"
            ),
            Self::OversizedDemand {
                largest_demand,
                largest_capacity,
            } => write!(
                f,
                "a delivery of {largest_demand:.0} exceeds the largest vehicle capacity {largest_capacity:.0}"
            ),
            Self::RouteDurationTooShort {
                configured_minutes,
                minimum_minutes,
            } => write!(
                f,
                "maximum route duration of {configured_minutes:.0} min is below {minimum_minutes:.0} min"
            ),
            Self::MoreVehiclesThanDeliveries { vehicles, deliveries } => {
                write!(f, "{vehicles} vehicles for only {deliveries} deliveries")
            }
        }
    }
}

/// Every cause that applies, in a fixed order. Empty when nothing obvious
/// is wrong with the input.
pub fn diagnose(problem: &RoutingProblem, params: &OptimizationParams) -> Vec<InfeasibilityCause> {
    let mut causes = Vec::new();
    let deliveries = problem.deliveries();

    let total_demand = problem.total_demand();
    let total_capacity = problem.total_capacity();
    if total_capacity < total_demand {
        causes.push(InfeasibilityCause::CapacityShortfall {
            total_demand,
            total_capacity,
            shortfall: total_demand - total_capacity,
        });
    }

    let largest_demand = deliveries
        .iter()
        .map(|&i| problem.demand[i])
        .fold(0.0, f64::max);
    let largest_capacity = problem
        .vehicles
        .iter()
        .map(|v| v.capacity)
        .fold(0.0, f64::max);
    if largest_demand > largest_capacity {
        causes.push(InfeasibilityCause::OversizedDemand {
            largest_demand,
            largest_capacity,
        });
    }

    if params.max_route_duration < MIN_SANE_ROUTE_MINUTES {
        causes.push(InfeasibilityCause::RouteDurationTooShort {
            configured_minutes: params.max_route_duration,
            minimum_minutes: MIN_SANE_ROUTE_MINUTES,
        });
    }

    if problem.vehicles.len() > deliveries.len() {
        causes.push(InfeasibilityCause::MoreVehiclesThanDeliveries {
            vehicles: problem.vehicles.len(),
            deliveries: deliveries.len(),
        });
    }

    causes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Vehicle;

    fn problem(demand: Vec<f64>, capacities: &[f64]) -> RoutingProblem {
        let n = demand.len();
        let vehicles = capacities
            .iter()
            .enumerate()
            .map(|(i, &c)| Vehicle::new(format!("v{i}"), c))
            .collect();
        RoutingProblem::new(vec![vec![0.0; n]; n], demand, vehicles)
    }

    #[test]
    fn test_capacity_shortfall_is_exact() {
        let problem = problem(vec![0.0, 400.0, 300.0, 300.0], &[300.0, 300.0]);
        let causes = diagnose(&problem, &OptimizationParams::default());
        assert_eq!(
            causes,
            vec![InfeasibilityCause::CapacityShortfall {
                total_demand: 1000.0,
                total_capacity: 600.0,
                shortfall: 400.0,
            }, InfeasibilityCause::OversizedDemand {
                largest_demand: 400.0,
                largest_capacity: 300.0,
            }]
        );
    }

    #[test]
    fn test_short_duration_and_idle_vehicles() {
        let problem = problem(vec![0.0, 1.0], &[10.0, 10.0]);
        let params = OptimizationParams {
            max_route_duration: 60.0,
            ..OptimizationParams::default()
        };
        let causes = diagnose(&problem, &params);
        assert_eq!(causes.len(), 2);
        assert!(matches!(causes[0], InfeasibilityCause::RouteDurationTooShort { .. }));
        assert_eq!(
            causes[1],
            InfeasibilityCause::MoreVehiclesThanDeliveries { vehicles: 2, deliveries: 1 }
        );
    }

    #[test]
    fn test_feasible_looking_problem_has_no_causes() {
        let problem = problem(vec![0.0, 5.0, 5.0], &[10.0]);
        assert!(diagnose(&problem, &OptimizationParams::default()).is_empty());
    }

    #[test]
    fn test_display_mentions_shortfall() {
        let cause = InfeasibilityCause::CapacityShortfall {
            total_demand: 1000.0,
            total_capacity: 600.0,
            shortfall: 400.0,
        };
        assert!(cause.to_string().contains("short by 400"));
    }
}
