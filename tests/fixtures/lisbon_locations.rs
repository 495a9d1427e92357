//! Lisbon-area locations for routing and resolver fixtures.
//!
//! Coordinates are approximate landmark positions, good enough for
//! haversine matrices and country-bounds checks.

use geo_vrp_planner::gazetteer::ReferenceRow;
use geo_vrp_planner::haversine::HaversineMatrix;
use geo_vrp_planner::{AddressQuery, RoutingProblem, TimeWindow, Vehicle};

/// A named location with coordinates.
#[derive(Debug, Clone)]
pub struct Location {
    pub name: &'static str,
    pub lat: f64,
    pub lng: f64,
}

impl Location {
    pub const fn new(name: &'static str, lat: f64, lng: f64) -> Self {
        Self { name, lat, lng }
    }

    pub fn coords(&self) -> (f64, f64) {
        (self.lat, self.lng)
    }
}

// ============================================================================
// Warehouses (depots)
// ============================================================================

pub const WAREHOUSES: &[Location] = &[
    Location::new("Armazém Cabo Ruivo", 38.7590, -9.1020),
    Location::new("Armazém Alcântara", 38.7050, -9.1770),
];

// ============================================================================
// Delivery points
// ============================================================================

pub const DELIVERIES: &[Location] = &[
    Location::new("Praça do Comércio", 38.7075, -9.1364),
    Location::new("Rossio", 38.7139, -9.1394),
    Location::new("Marquês de Pombal", 38.7253, -9.1500),
    Location::new("Torre de Belém", 38.6916, -9.2160),
    Location::new("Gare do Oriente", 38.7678, -9.0990),
    Location::new("Castelo de São Jorge", 38.7139, -9.1335),
    Location::new("Campo Pequeno", 38.7425, -9.1454),
    Location::new("Alvalade", 38.7530, -9.1440),
    Location::new("Benfica", 38.7510, -9.2010),
    Location::new("Basílica da Estrela", 38.7130, -9.1600),
    Location::new("LX Factory", 38.7037, -9.1785),
    Location::new("Parque Eduardo VII", 38.7287, -9.1547),
];

pub const MADRID: Location = Location::new("Puerta del Sol", 40.4168, -3.7038);

// ============================================================================
// Gazetteer data
// ============================================================================

pub fn reference_row(street: &str, location: &Location, postal4: &str, municipality: &str) -> ReferenceRow {
    ReferenceRow {
        street_text: street.to_string(),
        lat: location.lat,
        lon: location.lng,
        postal4: postal4.to_string(),
        municipality: municipality.to_string(),
    }
}

/// "Rua das Flores 10" in the 1000 postal area of Lisbon.
pub fn rua_das_flores() -> ReferenceRow {
    reference_row("Rua das Flores 10", &DELIVERIES[1], "1000", "LISBOA")
}

pub fn query(address: &str, postal_code: &str, municipality: &str) -> AddressQuery {
    AddressQuery::new(address)
        .with_postal_code(postal_code)
        .with_locality(municipality)
}

// ============================================================================
// Routing problems
// ============================================================================

/// Builder for routing problems over fixture locations, with the depot at
/// index 0 and deliveries following in the order added.
#[derive(Debug, Clone)]
pub struct ProblemBuilder {
    depot: Location,
    stops: Vec<(Location, f64, Option<TimeWindow>)>,
    vehicles: Vec<Vehicle>,
}

impl ProblemBuilder {
    pub fn new(depot: &Location) -> Self {
        Self {
            depot: depot.clone(),
            stops: Vec::new(),
            vehicles: Vec::new(),
        }
    }

    pub fn stop(mut self, location: &Location, demand: f64) -> Self {
        self.stops.push((location.clone(), demand, None));
        self
    }

    pub fn stop_within(mut self, location: &Location, demand: f64, window: TimeWindow) -> Self {
        self.stops.push((location.clone(), demand, Some(window)));
        self
    }

    pub fn stops(mut self, locations: &[Location], demand: f64) -> Self {
        for location in locations {
            self = self.stop(location, demand);
        }
        self
    }

    pub fn vehicle(mut self, id: &str, capacity: f64) -> Self {
        self.vehicles.push(Vehicle::new(id, capacity));
        self
    }

    pub fn coordinates(&self) -> Vec<(f64, f64)> {
        std::iter::once(self.depot.coords())
            .chain(self.stops.iter().map(|(location, _, _)| location.coords()))
            .collect()
    }

    pub fn build(self) -> RoutingProblem {
        let matrix = HaversineMatrix::build(&self.coordinates());
        let demand = std::iter::once(0.0)
            .chain(self.stops.iter().map(|(_, demand, _)| *demand))
            .collect();
        let has_windows = self.stops.iter().any(|(_, _, window)| window.is_some());
        let windows: Vec<Option<TimeWindow>> = std::iter::once(None)
            .chain(self.stops.iter().map(|(_, _, window)| *window))
            .collect();

        let problem = RoutingProblem::new(matrix, demand, self.vehicles);
        if has_windows {
            problem.with_time_windows(windows)
        } else {
            problem
        }
    }
}

/// Euclidean matrix over planar points; handy for geometry checks.
pub fn euclidean_matrix(points: &[(f64, f64)]) -> Vec<Vec<f64>> {
    points
        .iter()
        .map(|a| {
            points
                .iter()
                .map(|b| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt())
                .collect()
        })
        .collect()
}
