//! Test fixtures for geo-vrp-planner.
//!
//! Provides realistic test data including:
//! - Lisbon locations for routing problems
//! - Reference gazetteer rows and address queries
//! - Builders for routing problems

pub mod lisbon_locations;

pub use lisbon_locations::*;
