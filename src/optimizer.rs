//! Routing problem model and the strategy-dispatching optimizer.
//!
//! Two strategies share one interface: a geometry-only heuristic
//! (`Strategy::Heuristic`) and a capacity/duration-aware solver
//! (`Strategy::Constrained`). Both return a [`RouteSolution`] in the
//! matrix's distance units.

use std::collections::BTreeSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};
use crate::traits::DistanceMatrix;
use crate::{constrained, heuristic};

/// Tolerance for floating comparisons of loads and times.
pub(crate) const EPSILON: f64 = 1e-9;

/// Inclusive window in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: f64,
    pub end: f64,
}

impl TimeWindow {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, minute: f64) -> bool {
        minute >= self.start && minute <= self.end
    }

    /// Finite bounds with `start <= end`.
    pub fn is_well_formed(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.start <= self.end
    }
}

impl Default for TimeWindow {
    /// 08:00 until midnight.
    fn default() -> Self {
        Self {
            start: 8.0 * 60.0,
            end: 24.0 * 60.0,
        }
    }
}

fn default_cost_per_distance() -> f64 {
    1.0
}

fn default_speed_kmh() -> f64 {
    40.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: String,
    pub capacity: f64,
    #[serde(default = "default_cost_per_distance")]
    pub cost_per_distance: f64,
    #[serde(default = "default_speed_kmh")]
    pub avg_speed_kmh: f64,
    /// Start and end location of every route this vehicle drives.
    #[serde(default)]
    pub depot_index: usize,
    #[serde(default)]
    pub operating_window: TimeWindow,
}

impl Vehicle {
    pub fn new(id: impl Into<String>, capacity: f64) -> Self {
        Self {
            id: id.into(),
            capacity,
            cost_per_distance: default_cost_per_distance(),
            avg_speed_kmh: default_speed_kmh(),
            depot_index: 0,
            operating_window: TimeWindow::default(),
        }
    }

    pub fn with_depot(mut self, depot_index: usize) -> Self {
        self.depot_index = depot_index;
        self
    }

    pub fn with_speed(mut self, avg_speed_kmh: f64) -> Self {
        self.avg_speed_kmh = avg_speed_kmh;
        self
    }

    pub fn with_cost_per_distance(mut self, cost_per_distance: f64) -> Self {
        self.cost_per_distance = cost_per_distance;
        self
    }

    pub fn with_operating_window(mut self, window: TimeWindow) -> Self {
        self.operating_window = window;
        self
    }

    /// Minutes needed to drive `km` at the vehicle's average speed.
    pub fn travel_minutes(&self, km: f64) -> f64 {
        km / self.avg_speed_kmh * 60.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingProblem {
    pub distance_matrix: DistanceMatrix,
    pub demand: Vec<f64>,
    pub vehicles: Vec<Vehicle>,
    /// Optional arrival window per location, indexed like the matrix.
    #[serde(default)]
    pub time_windows: Option<Vec<Option<TimeWindow>>>,
}

impl RoutingProblem {
    pub fn new(distance_matrix: DistanceMatrix, demand: Vec<f64>, vehicles: Vec<Vehicle>) -> Self {
        Self {
            distance_matrix,
            demand,
            vehicles,
            time_windows: None,
        }
    }

    pub fn with_time_windows(mut self, time_windows: Vec<Option<TimeWindow>>) -> Self {
        self.time_windows = Some(time_windows);
        self
    }

    pub fn len(&self) -> usize {
        self.distance_matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distance_matrix.is_empty()
    }

    pub fn depot_indices(&self) -> BTreeSet<usize> {
        self.vehicles.iter().map(|v| v.depot_index).collect()
    }

    /// Every location that is not some vehicle's depot, in index order.
    pub fn deliveries(&self) -> Vec<usize> {
        let depots = self.depot_indices();
        (0..self.len()).filter(|i| !depots.contains(i)).collect()
    }

    pub fn time_window(&self, location: usize) -> Option<TimeWindow> {
        self.time_windows
            .as_ref()
            .and_then(|windows| windows.get(location).copied().flatten())
    }

    pub fn total_demand(&self) -> f64 {
        self.deliveries().iter().map(|&i| self.demand[i]).sum()
    }

    pub fn total_capacity(&self) -> f64 {
        self.vehicles.iter().map(|v| v.capacity).sum()
    }

    /// Distance of a closed stop sequence.
    pub fn path_distance(&self, stops: &[usize]) -> f64 {
        stops
            .windows(2)
            .map(|leg| self.distance_matrix[leg[0]][leg[1]])
            .sum()
    }

    /// Reject structurally malformed input. Infeasibility is not checked here.
    pub fn validate(&self) -> Result<()> {
        let n = self.len();
        if self.vehicles.is_empty() {
            return Err(invalid("no vehicles"));
        }
        if let Some(row) = self.distance_matrix.iter().position(|row| row.len() != n) {
            return Err(invalid(format!("matrix row {row} does not have {n} columns")));
        }
        if self
            .distance_matrix
            .iter()
            .flatten()
            .any(|d| d.is_nan() || *d < 0.0)
        {
            return Err(invalid("matrix contains negative or NaN distances"));
        }
        if self.demand.len() != n {
            return Err(invalid(format!(
                "{} demands for {n} locations",
                self.demand.len()
            )));
        }
        if self.demand.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(invalid("demands must be finite and non-negative"));
        }
        for vehicle in &self.vehicles {
            if vehicle.depot_index >= n {
                return Err(invalid(format!(
                    "vehicle {} depot {} out of range",
                    vehicle.id, vehicle.depot_index
                )));
            }
            if vehicle.avg_speed_kmh.is_nan() || vehicle.avg_speed_kmh <= 0.0 {
                return Err(invalid(format!("vehicle {} has no positive speed", vehicle.id)));
            }
            if vehicle.capacity < 0.0 || vehicle.capacity.is_nan() {
                return Err(invalid(format!("vehicle {} has negative capacity", vehicle.id)));
            }
            if !vehicle.cost_per_distance.is_finite() || vehicle.cost_per_distance < 0.0 {
                return Err(invalid(format!(
                    "vehicle {} cost per distance must be finite and non-negative",
                    vehicle.id
                )));
            }
            if !vehicle.operating_window.is_well_formed() {
                return Err(invalid(format!(
                    "vehicle {} operating window starts after it ends",
                    vehicle.id
                )));
            }
        }
        if let Some(windows) = &self.time_windows {
            if windows.len() != n {
                return Err(invalid(format!("{} time windows for {n} locations", windows.len())));
            }
            if windows.iter().flatten().any(|w| !w.is_well_formed()) {
                return Err(invalid("time window starts after it ends"));
            }
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> PlannerError {
    PlannerError::InvalidProblem(message.into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolveStatus {
    Success,
    NoSolution,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Split, nearest neighbour and 2-opt. Ignores capacity and time.
    Heuristic,
    #[default]
    Constrained,
}

impl FromStr for Strategy {
    type Err = PlannerError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "constrained" => Ok(Self::Constrained),
            other => Err(PlannerError::Config(format!("unknown strategy '{other}'"))),
        }
    }
}

/// One vehicle's route. `stops` starts and ends at the vehicle's depot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePlan {
    pub vehicle_index: usize,
    pub vehicle_id: String,
    pub stops: Vec<usize>,
}

impl RoutePlan {
    /// Stops between the two depot visits.
    pub fn deliveries(&self) -> &[usize] {
        match self.stops.len() {
            0..=2 => &[],
            len => &self.stops[1..len - 1],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSolution {
    pub routes: Vec<RoutePlan>,
    pub per_route_distance: Vec<f64>,
    pub per_route_load: Vec<f64>,
    pub total_distance: f64,
    pub status: SolveStatus,
}

impl RouteSolution {
    pub fn no_solution() -> Self {
        Self {
            routes: Vec::new(),
            per_route_distance: Vec::new(),
            per_route_load: Vec::new(),
            total_distance: 0.0,
            status: SolveStatus::NoSolution,
        }
    }

    /// Assemble a solution from per-vehicle delivery sequences (depots not
    /// included). Vehicles with no deliveries are dropped.
    pub(crate) fn from_assignments(problem: &RoutingProblem, assignments: Vec<Vec<usize>>) -> Self {
        let mut solution = Self {
            status: SolveStatus::Success,
            ..Self::no_solution()
        };

        for (vehicle_index, deliveries) in assignments.into_iter().enumerate() {
            if deliveries.is_empty() {
                continue;
            }
            let vehicle = &problem.vehicles[vehicle_index];
            let load = deliveries.iter().map(|&i| problem.demand[i]).sum();
            let mut stops = Vec::with_capacity(deliveries.len() + 2);
            stops.push(vehicle.depot_index);
            stops.extend(deliveries);
            stops.push(vehicle.depot_index);

            let distance = problem.path_distance(&stops);

            solution.total_distance += distance;
            solution.per_route_distance.push(distance);
            solution.per_route_load.push(load);
            solution.routes.push(RoutePlan {
                vehicle_index,
                vehicle_id: vehicle.id.clone(),
                stops,
            });
        }

        solution
    }

    pub fn is_success(&self) -> bool {
        self.status == SolveStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationParams {
    /// Multiplier on fixed-point arc costs.
    pub distance_weight: f64,
    /// Penalty per scaled minute a route runs past `max_route_duration`.
    pub balance_weight: f64,
    /// Soft route duration bound in minutes.
    pub max_route_duration: f64,
    pub search_time_limit_ms: u64,
    /// Optional cap on perturbation rounds, checked alongside the time limit.
    pub max_iterations: Option<usize>,
    /// Minutes spent at every delivery.
    pub service_minutes: f64,
    pub seed: u64,
}

impl Default for OptimizationParams {
    fn default() -> Self {
        Self {
            distance_weight: 100.0,
            balance_weight: 10.0,
            max_route_duration: 8.0 * 60.0,
            search_time_limit_ms: 30_000,
            max_iterations: None,
            service_minutes: 0.0,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicOptions {
    /// Shuffle deliveries before slicing them across vehicles.
    pub randomize: bool,
    pub seed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct RouteOptimizer {
    params: OptimizationParams,
    heuristic: HeuristicOptions,
}

impl RouteOptimizer {
    pub fn new(params: OptimizationParams) -> Self {
        Self {
            params,
            heuristic: HeuristicOptions::default(),
        }
    }

    pub fn with_heuristic_options(mut self, options: HeuristicOptions) -> Self {
        self.heuristic = options;
        self
    }

    pub fn params(&self) -> &OptimizationParams {
        &self.params
    }

    pub fn solve(&self, problem: &RoutingProblem, strategy: Strategy) -> Result<RouteSolution> {
        problem.validate()?;

        let solution = match strategy {
            Strategy::Heuristic => heuristic::solve(problem, &self.heuristic),
            Strategy::Constrained => constrained::solve(problem, &self.params),
        };

        tracing::info!(
            ?strategy,
            status = ?solution.status,
            routes = solution.routes.len(),
            total_distance = solution.total_distance,
            "routing solved"
        );
        Ok(solution)
    }
}
