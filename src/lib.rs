//! Address resolution and vehicle routing for delivery planning.
//!
//! Noisy postal addresses are resolved to coordinates through a waterfall
//! of local and external sources, then grouped and ordered into vehicle
//! routes under capacity and duration constraints.

pub mod address;
pub mod budget;
pub mod config;
pub mod constrained;
pub mod diagnostics;
pub mod error;
pub mod failure;
pub mod gazetteer;
pub mod google;
pub mod haversine;
pub mod heuristic;
pub mod nominatim;
pub mod optimizer;
pub mod osrm;
pub mod polyline;
pub mod postal_lookup;
pub mod resolver;
pub mod schedule;
pub mod similarity;
pub mod traits;

pub use address::{AddressQuery, QualityTier, Source};
pub use config::PlannerConfig;
pub use error::{PlannerError, Result};
pub use optimizer::{
    HeuristicOptions, OptimizationParams, RouteOptimizer, RoutePlan, RouteSolution, RoutingProblem, SolveStatus,
    Strategy, TimeWindow, Vehicle,
};
pub use resolver::{AddressResolver, ResolutionResult, ResolverContext};
