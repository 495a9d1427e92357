//! Capacitated multi-depot routing with a soft duration bound.
//!
//! Construction (path cheapest arc, then demand-ordered packing) is
//! followed by local search and seeded ruin-and-recreate rounds until the
//! wall-clock budget runs out. Every phase checks the deadline, so a solve
//! returns shortly after `search_time_limit_ms` with the best plan so far.
//! Arc costs are fixed-point integers.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::optimizer::{EPSILON, OptimizationParams, RouteSolution, RoutingProblem};

/// Fixed-point factor applied to matrix distances.
pub const DISTANCE_SCALE: f64 = 100.0;

/// Upper bound on deliveries removed in one ruin step.
const MAX_RUIN: usize = 30;

pub(crate) fn solve(problem: &RoutingProblem, params: &OptimizationParams) -> RouteSolution {
    let model = Model::new(problem, params);
    let mut rng = StdRng::seed_from_u64(params.seed);

    let mut current = model.construct();
    model.local_search(&mut current);
    let mut best = current.clone();
    tracing::debug!(
        unassigned = best.unassigned.len(),
        cost = best.total_cost(),
        "initial solution"
    );

    let mut iterations = 0;
    while model.customers.len() > 1
        && !model.expired()
        && params.max_iterations.is_none_or(|max| iterations < max)
    {
        iterations += 1;

        let mut candidate = current.clone();
        model.ruin(&mut candidate, &mut rng);
        model.recreate(&mut candidate, &mut rng);
        model.local_search(&mut candidate);

        if !candidate.is_worse_than(&current) {
            current = candidate;
            if current.is_better_than(&best) {
                best = current.clone();
            }
        }
    }

    tracing::debug!(
        iterations,
        unassigned = best.unassigned.len(),
        cost = best.total_cost(),
        "search finished"
    );

    if !best.unassigned.is_empty() {
        return RouteSolution::no_solution();
    }
    RouteSolution::from_assignments(problem, best.routes)
}

/// Evaluated cost of one route.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RouteCost {
    load: f64,
    /// Minutes from departure to return, waiting included.
    duration: f64,
    cost: f64,
}

impl RouteCost {
    const EMPTY: Self = Self {
        load: 0.0,
        duration: 0.0,
        cost: 0.0,
    };
}

#[derive(Debug, Clone)]
struct RouteState {
    stops: Vec<usize>,
    cost: RouteCost,
}

/// Deliveries per vehicle plus those not yet placed.
#[derive(Debug, Clone)]
struct Plan {
    routes: Vec<Vec<usize>>,
    costs: Vec<RouteCost>,
    unassigned: Vec<usize>,
}

impl Plan {
    fn total_cost(&self) -> f64 {
        self.costs.iter().map(|c| c.cost).sum()
    }

    /// Fewer unassigned deliveries first, then lower cost.
    fn is_better_than(&self, other: &Plan) -> bool {
        match self.unassigned.len().cmp(&other.unassigned.len()) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => self.total_cost() < other.total_cost() - EPSILON,
        }
    }

    fn is_worse_than(&self, other: &Plan) -> bool {
        other.is_better_than(self)
    }

    fn route(&self, vehicle: usize) -> RouteState {
        RouteState {
            stops: self.routes[vehicle].clone(),
            cost: self.costs[vehicle],
        }
    }

    fn set_route(&mut self, vehicle: usize, route: RouteState) {
        self.routes[vehicle] = route.stops;
        self.costs[vehicle] = route.cost;
    }
}

struct Model<'a> {
    problem: &'a RoutingProblem,
    params: &'a OptimizationParams,
    /// Fixed-point arc costs, `None` for unreachable pairs.
    scaled: Vec<Vec<Option<i64>>>,
    customers: Vec<usize>,
    deadline: Instant,
}

impl<'a> Model<'a> {
    fn new(problem: &'a RoutingProblem, params: &'a OptimizationParams) -> Self {
        let scaled = problem
            .distance_matrix
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&d| d.is_finite().then(|| (d * DISTANCE_SCALE).round() as i64))
                    .collect()
            })
            .collect();

        Self {
            problem,
            params,
            scaled,
            customers: problem.deliveries(),
            deadline: Instant::now() + Duration::from_millis(params.search_time_limit_ms),
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    /// Cost of driving `vehicle` through `stops`, or `None` if the route
    /// breaks capacity, a time window or the operating window.
    fn evaluate(&self, vehicle: usize, stops: &[usize]) -> Option<RouteCost> {
        if stops.is_empty() {
            return Some(RouteCost::EMPTY);
        }

        let v = &self.problem.vehicles[vehicle];
        let load: f64 = stops.iter().map(|&s| self.problem.demand[s]).sum();
        if load > v.capacity + EPSILON {
            return None;
        }

        let matrix = &self.problem.distance_matrix;
        let mut time = v.operating_window.start;
        let mut arcs = 0i64;
        let mut prev = v.depot_index;

        for &stop in stops {
            arcs += self.scaled[prev][stop]?;
            time += v.travel_minutes(matrix[prev][stop]);
            if let Some(window) = self.problem.time_window(stop) {
                if time > window.end + EPSILON {
                    return None;
                }
                time = time.max(window.start);
            }
            time += self.params.service_minutes;
            prev = stop;
        }

        arcs += self.scaled[prev][v.depot_index]?;
        time += v.travel_minutes(matrix[prev][v.depot_index]);
        if time > v.operating_window.end + EPSILON {
            return None;
        }

        let duration = time - v.operating_window.start;
        let overflow = (duration - self.params.max_route_duration).max(0.0);
        let cost = arcs as f64 * self.params.distance_weight * v.cost_per_distance
            + overflow * DISTANCE_SCALE * self.params.balance_weight;

        Some(RouteCost { load, duration, cost })
    }

    fn empty_plan(&self) -> Plan {
        let vehicles = self.problem.vehicles.len();
        Plan {
            routes: vec![Vec::new(); vehicles],
            costs: vec![RouteCost::EMPTY; vehicles],
            unassigned: Vec::new(),
        }
    }

    /// Best of the two construction heuristics. The second one is skipped
    /// once the deadline has passed.
    fn construct(&self) -> Plan {
        let by_arc = self.path_cheapest_arc();
        if self.expired() {
            return by_arc;
        }
        let by_demand = self.pack_by_demand();
        if by_demand.is_better_than(&by_arc) {
            by_demand
        } else {
            by_arc
        }
    }

    /// Extend each vehicle's path with the cheapest feasible arc until
    /// nothing fits, then insert leftovers wherever cheapest. Deliveries not
    /// reached before the deadline stay unassigned.
    fn path_cheapest_arc(&self) -> Plan {
        let mut plan = self.empty_plan();
        let mut remaining = self.customers.clone();

        for vehicle in 0..self.problem.vehicles.len() {
            let depot = self.problem.vehicles[vehicle].depot_index;
            while !self.expired() {
                let last = plan.routes[vehicle].last().copied().unwrap_or(depot);
                let mut chosen: Option<(i64, usize, RouteCost)> = None;

                for (pos, &customer) in remaining.iter().enumerate() {
                    let Some(arc) = self.scaled[last][customer] else {
                        continue;
                    };
                    if chosen.is_some_and(|(best, _, _)| arc >= best) {
                        continue;
                    }
                    plan.routes[vehicle].push(customer);
                    let cost = self.evaluate(vehicle, &plan.routes[vehicle]);
                    plan.routes[vehicle].pop();
                    if let Some(cost) = cost {
                        chosen = Some((arc, pos, cost));
                    }
                }

                let Some((_, pos, cost)) = chosen else {
                    break;
                };
                plan.routes[vehicle].push(remaining.remove(pos));
                plan.costs[vehicle] = cost;
            }
        }

        self.insert_all(&mut plan, remaining);
        plan
    }

    /// Cheapest insertion in order of descending demand.
    fn pack_by_demand(&self) -> Plan {
        let mut order = self.customers.clone();
        order.sort_by(|&a, &b| self.problem.demand[b].total_cmp(&self.problem.demand[a]));

        let mut plan = self.empty_plan();
        self.insert_all(&mut plan, order);
        plan
    }

    /// Cheapest-insert `customers` in order. Those that fit nowhere, or come
    /// after the deadline, become unassigned.
    fn insert_all(&self, plan: &mut Plan, customers: Vec<usize>) {
        for customer in customers {
            if self.expired() || !self.insert_cheapest(plan, customer) {
                plan.unassigned.push(customer);
            }
        }
    }

    /// Insert `customer` at the feasible position with the smallest cost
    /// increase. Returns false when no position is feasible.
    fn insert_cheapest(&self, plan: &mut Plan, customer: usize) -> bool {
        let mut best: Option<(f64, usize, usize, RouteCost)> = None;

        for vehicle in 0..plan.routes.len() {
            let mut candidate = plan.routes[vehicle].clone();
            for position in 0..=plan.routes[vehicle].len() {
                candidate.insert(position, customer);
                if let Some(cost) = self.evaluate(vehicle, &candidate) {
                    let delta = cost.cost - plan.costs[vehicle].cost;
                    if best.is_none_or(|(best_delta, ..)| delta < best_delta) {
                        best = Some((delta, vehicle, position, cost));
                    }
                }
                candidate.remove(position);
            }
        }

        match best {
            Some((_, vehicle, position, cost)) => {
                plan.routes[vehicle].insert(position, customer);
                plan.costs[vehicle] = cost;
                true
            }
            None => false,
        }
    }

    // ========================================================================
    // Local search operators
    // ========================================================================

    /// Apply improving moves until none is left or the deadline passes.
    fn local_search(&self, plan: &mut Plan) {
        while !self.expired() {
            let mut improved = false;

            for vehicle in 0..plan.routes.len() {
                if self.two_opt_improve(plan, vehicle) {
                    improved = true;
                }
            }
            if self.relocate_improve(plan) {
                improved = true;
            }
            if self.swap_improve(plan) {
                improved = true;
            }
            if self.insert_unassigned(plan) {
                improved = true;
            }

            if !improved {
                break;
            }
        }
    }

    /// Reverse a segment of one route if that lowers its cost.
    fn two_opt_improve(&self, plan: &mut Plan, vehicle: usize) -> bool {
        let route = plan.route(vehicle);
        let n = route.stops.len();
        if n < 2 {
            return false;
        }

        for i in 0..n - 1 {
            if self.expired() {
                return false;
            }
            for j in i + 1..n {
                let mut candidate = route.stops.clone();
                candidate[i..=j].reverse();
                if let Some(cost) = self.evaluate(vehicle, &candidate) {
                    if cost.cost < route.cost.cost - EPSILON {
                        plan.set_route(vehicle, RouteState { stops: candidate, cost });
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Move one delivery to another position, in the same or another route.
    fn relocate_improve(&self, plan: &mut Plan) -> bool {
        let vehicles = plan.routes.len();

        for from in 0..vehicles {
            for index in 0..plan.routes[from].len() {
                if self.expired() {
                    return false;
                }
                let customer = plan.routes[from][index];
                let mut shortened = plan.routes[from].clone();
                shortened.remove(index);

                for to in 0..vehicles {
                    if from == to {
                        for position in 0..=shortened.len() {
                            if position == index {
                                continue;
                            }
                            let mut candidate = shortened.clone();
                            candidate.insert(position, customer);
                            if let Some(cost) = self.evaluate(from, &candidate) {
                                if cost.cost < plan.costs[from].cost - EPSILON {
                                    plan.set_route(from, RouteState { stops: candidate, cost });
                                    return true;
                                }
                            }
                        }
                        continue;
                    }

                    let Some(from_cost) = self.evaluate(from, &shortened) else {
                        continue;
                    };
                    let before = plan.costs[from].cost + plan.costs[to].cost;

                    for position in 0..=plan.routes[to].len() {
                        let mut candidate = plan.routes[to].clone();
                        candidate.insert(position, customer);
                        let Some(to_cost) = self.evaluate(to, &candidate) else {
                            continue;
                        };
                        if from_cost.cost + to_cost.cost < before - EPSILON {
                            plan.set_route(from, RouteState { stops: shortened, cost: from_cost });
                            plan.set_route(to, RouteState { stops: candidate, cost: to_cost });
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// Exchange two deliveries between different routes.
    fn swap_improve(&self, plan: &mut Plan) -> bool {
        let vehicles = plan.routes.len();

        for first in 0..vehicles {
            for second in first + 1..vehicles {
                let before = plan.costs[first].cost + plan.costs[second].cost;
                for i in 0..plan.routes[first].len() {
                    if self.expired() {
                        return false;
                    }
                    for j in 0..plan.routes[second].len() {
                        let mut a = plan.routes[first].clone();
                        let mut b = plan.routes[second].clone();
                        std::mem::swap(&mut a[i], &mut b[j]);

                        let (Some(cost_a), Some(cost_b)) =
                            (self.evaluate(first, &a), self.evaluate(second, &b))
                        else {
                            continue;
                        };
                        if cost_a.cost + cost_b.cost < before - EPSILON {
                            plan.set_route(first, RouteState { stops: a, cost: cost_a });
                            plan.set_route(second, RouteState { stops: b, cost: cost_b });
                            return true;
                        }
                    }
                }
            }
        }
        false
    }

    /// Place any unassigned delivery that now fits somewhere.
    fn insert_unassigned(&self, plan: &mut Plan) -> bool {
        let pending = std::mem::take(&mut plan.unassigned);
        let before = pending.len();
        self.insert_all(plan, pending);
        plan.unassigned.len() < before
    }

    // ========================================================================
    // Ruin and recreate
    // ========================================================================

    /// Remove a random batch of deliveries: either uniformly at random or a
    /// seed delivery together with its nearest assigned neighbours.
    fn ruin(&self, plan: &mut Plan, rng: &mut StdRng) {
        let assigned: Vec<usize> = plan.routes.iter().flatten().copied().collect();
        if assigned.is_empty() {
            return;
        }

        let limit = (assigned.len() / 4).clamp(1, MAX_RUIN);
        let count = rng.gen_range(1..=limit);

        let removed: Vec<usize> = if rng.gen_bool(0.5) {
            let seed = assigned[rng.gen_range(0..assigned.len())];
            let matrix = &self.problem.distance_matrix;
            let mut by_distance = assigned;
            by_distance.sort_by(|&a, &b| matrix[seed][a].total_cmp(&matrix[seed][b]));
            by_distance.truncate(count);
            by_distance
        } else {
            assigned.choose_multiple(rng, count).copied().collect()
        };

        for vehicle in 0..plan.routes.len() {
            let before = plan.routes[vehicle].len();
            plan.routes[vehicle].retain(|stop| !removed.contains(stop));
            if plan.routes[vehicle].len() == before {
                continue;
            }
            match self.evaluate(vehicle, &plan.routes[vehicle]) {
                Some(cost) => plan.costs[vehicle] = cost,
                // shortcuts can be slower than detours on non-metric matrices
                None => {
                    plan.unassigned.append(&mut plan.routes[vehicle]);
                    plan.costs[vehicle] = RouteCost::EMPTY;
                }
            }
        }
        plan.unassigned.extend(removed);
    }

    /// Reinsert unassigned deliveries, in random or descending-demand order.
    fn recreate(&self, plan: &mut Plan, rng: &mut StdRng) {
        let mut pending = std::mem::take(&mut plan.unassigned);
        if rng.gen_bool(0.5) {
            pending.shuffle(rng);
        } else {
            pending.sort_by(|&a, &b| self.problem.demand[b].total_cmp(&self.problem.demand[a]));
        }
        self.insert_all(plan, pending);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::{TimeWindow, Vehicle};

    fn params() -> OptimizationParams {
        OptimizationParams {
            search_time_limit_ms: 2_000,
            max_iterations: Some(50),
            ..OptimizationParams::default()
        }
    }

    /// Depot at 0, deliveries at km 1..=n along a line.
    fn line(n: usize, demand: f64, vehicles: Vec<Vehicle>) -> RoutingProblem {
        let matrix = (0..=n)
            .map(|i| (0..=n).map(|j| (i as f64 - j as f64).abs()).collect())
            .collect();
        let mut demands = vec![demand; n + 1];
        demands[0] = 0.0;
        RoutingProblem::new(matrix, demands, vehicles)
    }

    #[test]
    fn test_evaluate_scales_arc_costs() {
        let problem = line(2, 1.0, vec![Vehicle::new("v1", 10.0)]);
        let params = params();
        let model = Model::new(&problem, &params);
        let cost = model.evaluate(0, &[1, 2]).unwrap();
        // 1 + 1 + 2 km, x100 fixed point, x100 distance weight
        assert_eq!(cost.cost, 4.0 * DISTANCE_SCALE * 100.0);
        assert_eq!(cost.load, 2.0);
        assert!((cost.duration - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_evaluate_rejects_overload() {
        let problem = line(2, 6.0, vec![Vehicle::new("v1", 10.0)]);
        let params = params();
        let model = Model::new(&problem, &params);
        assert!(model.evaluate(0, &[1]).is_some());
        assert!(model.evaluate(0, &[1, 2]).is_none());
    }

    #[test]
    fn test_duration_overflow_is_penalized_not_rejected() {
        let problem = line(2, 1.0, vec![Vehicle::new("v1", 10.0)]);
        let params = OptimizationParams {
            max_route_duration: 1.0,
            ..params()
        };
        let model = Model::new(&problem, &params);
        let cost = model.evaluate(0, &[1, 2]).unwrap();
        // 6 minutes of driving, 5 over the bound
        let expected = 4.0 * DISTANCE_SCALE * 100.0 + 5.0 * DISTANCE_SCALE * 10.0;
        assert!((cost.cost - expected).abs() < 1e-6);
    }

    #[test]
    fn test_time_window_missed_is_infeasible() {
        let problem = line(2, 1.0, vec![Vehicle::new("v1", 10.0)]).with_time_windows(vec![
            None,
            None,
            Some(TimeWindow::new(480.0, 481.0)),
        ]);
        let params = params();
        let model = Model::new(&problem, &params);
        // km 2 reached at 08:03 via km 1, but 08:00 + 3 > 08:01
        assert!(model.evaluate(0, &[1, 2]).is_none());
        assert!(model.evaluate(0, &[2]).is_none());
    }

    #[test]
    fn test_early_arrival_waits() {
        let problem = line(1, 1.0, vec![Vehicle::new("v1", 10.0)])
            .with_time_windows(vec![None, Some(TimeWindow::new(600.0, 700.0))]);
        let params = params();
        let model = Model::new(&problem, &params);
        let cost = model.evaluate(0, &[1]).unwrap();
        // wait until 10:00, then 1.5 minutes back
        assert!((cost.duration - 121.5).abs() < 1e-9);
    }

    #[test]
    fn test_solve_splits_by_capacity() {
        let vehicles = vec![Vehicle::new("v1", 10.0), Vehicle::new("v2", 10.0)];
        let problem = line(4, 5.0, vehicles);
        let solution = solve(&problem, &params());

        assert!(solution.is_success());
        assert_eq!(solution.routes.len(), 2);
        for load in &solution.per_route_load {
            assert!(*load <= 10.0);
        }
        let mut visited: Vec<usize> = solution
            .routes
            .iter()
            .flat_map(|r| r.deliveries().to_vec())
            .collect();
        visited.sort();
        assert_eq!(visited, vec![1, 2, 3, 4]);
    }

    /// `side * side` deliveries on a 100 m grid around a corner depot.
    fn grid(side: usize, vehicles: Vec<Vehicle>) -> RoutingProblem {
        let points: Vec<(f64, f64)> = std::iter::once((0.0, 0.0))
            .chain((0..side * side).map(|i| ((i % side) as f64 * 0.1, (i / side) as f64 * 0.1)))
            .collect();
        let matrix = points
            .iter()
            .map(|a| points.iter().map(|b| (a.0 - b.0).hypot(a.1 - b.1)).collect())
            .collect();
        let mut demands = vec![1.0; points.len()];
        demands[0] = 0.0;
        RoutingProblem::new(matrix, demands, vehicles)
    }

    #[test]
    fn test_large_solve_stops_near_time_limit() {
        let vehicles = (1..=4).map(|k| Vehicle::new(format!("v{k}"), 1000.0)).collect();
        let problem = grid(20, vehicles);
        let params = OptimizationParams {
            search_time_limit_ms: 300,
            max_iterations: None,
            ..OptimizationParams::default()
        };

        let started = Instant::now();
        let solution = solve(&problem, &params);
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(1_500), "took {elapsed:?}");
        if solution.is_success() {
            let visited: usize = solution.routes.iter().map(|r| r.deliveries().len()).sum();
            assert_eq!(visited, 400);
        }
    }

    #[test]
    fn test_expired_model_leaves_deliveries_unassigned() {
        let problem = line(5, 1.0, vec![Vehicle::new("v1", 10.0)]);
        let params = OptimizationParams {
            search_time_limit_ms: 0,
            ..params()
        };
        let model = Model::new(&problem, &params);
        assert!(model.expired());

        let plan = model.construct();
        assert!(plan.routes[0].is_empty());
        assert_eq!(plan.unassigned, vec![1, 2, 3, 4, 5]);
        assert_eq!(solve(&problem, &params), RouteSolution::no_solution());
    }

    #[test]
    fn test_oversized_delivery_has_no_solution() {
        let problem = line(1, 50.0, vec![Vehicle::new("v1", 10.0)]);
        let solution = solve(&problem, &params());
        assert_eq!(solution, RouteSolution::no_solution());
    }
}
