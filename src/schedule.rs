//! Arrival and departure times along a planned route.

use serde::Serialize;

use crate::optimizer::{RoutePlan, RoutingProblem};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopTime {
    pub location: usize,
    /// Minutes since midnight.
    pub arrival: f64,
    pub departure: f64,
    pub leg_km: f64,
    pub cumulative_km: f64,
    pub cumulative_load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSchedule {
    pub vehicle_id: String,
    pub departure: f64,
    pub stops: Vec<StopTime>,
    /// Minutes since midnight the vehicle is back at its depot.
    pub return_at: f64,
    pub total_km: f64,
}

impl RouteSchedule {
    pub fn duration_minutes(&self) -> f64 {
        self.return_at - self.departure
    }
}

/// Walk `plan` from its vehicle's operating-window start, driving at the
/// vehicle's average speed and spending `service_minutes` at each delivery.
/// Early arrivals wait for the location's time window to open.
pub fn schedule_route(plan: &RoutePlan, problem: &RoutingProblem, service_minutes: f64) -> RouteSchedule {
    let vehicle = &problem.vehicles[plan.vehicle_index];
    let matrix = &problem.distance_matrix;
    let departure = vehicle.operating_window.start;

    let mut time = departure;
    let mut cumulative_km = 0.0;
    let mut cumulative_load = 0.0;
    let mut prev = vehicle.depot_index;
    let mut stops = Vec::with_capacity(plan.deliveries().len());

    for &location in plan.deliveries() {
        let leg_km = matrix[prev][location];
        cumulative_km += leg_km;
        cumulative_load += problem.demand[location];

        time += vehicle.travel_minutes(leg_km);
        if let Some(window) = problem.time_window(location) {
            time = time.max(window.start);
        }
        let arrival = time;
        time += service_minutes;

        stops.push(StopTime {
            location,
            arrival,
            departure: time,
            leg_km,
            cumulative_km,
            cumulative_load,
        });
        prev = location;
    }

    let back_km = matrix[prev][vehicle.depot_index];
    RouteSchedule {
        vehicle_id: vehicle.id.clone(),
        departure,
        stops,
        return_at: time + vehicle.travel_minutes(back_km),
        total_km: cumulative_km + back_km,
    }
}

/// `HH:MM` for a minute-of-day value, rounded to the nearest minute.
pub fn format_clock(minutes: f64) -> String {
    let total = minutes.round().max(0.0) as u64;
    format!("{:02}:{:02}", total / 60, total % 60)
}
