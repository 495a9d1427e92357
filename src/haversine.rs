//! Great-circle distance matrix.
//!
//! Straight-line distances ignore the road network but need no external
//! service, so this is the default matrix for the optimizer.

use rayon::prelude::*;

use crate::error::Result;
use crate::traits::{DistanceMatrix, DistanceMatrixProvider};

/// Earth radius in kilometers.
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Haversine distance between two (lat, lon) points in kilometers.
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lng1) = from;
    let (lat2, lng2) = to;

    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lng = (lng2 - lng1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lng / 2.0).sin().powi(2);
    // clamp guards against a > 1 from rounding on antipodal points
    let c = 2.0 * a.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * c
}

/// Haversine-based distance matrix provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaversineMatrix;

impl HaversineMatrix {
    /// Symmetric kilometre matrix with a zero diagonal. Rows are computed in
    /// parallel; only the upper triangle is evaluated.
    pub fn build(coordinates: &[(f64, f64)]) -> DistanceMatrix {
        let n = coordinates.len();
        let upper: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| {
                ((i + 1)..n)
                    .map(|j| haversine_km(coordinates[i], coordinates[j]))
                    .collect()
            })
            .collect();

        let mut matrix = vec![vec![0.0; n]; n];
        for (i, row) in upper.into_iter().enumerate() {
            for (offset, km) in row.into_iter().enumerate() {
                let j = i + 1 + offset;
                matrix[i][j] = km;
                matrix[j][i] = km;
            }
        }

        tracing::debug!(locations = n, "built haversine matrix");
        matrix
    }
}

impl DistanceMatrixProvider for HaversineMatrix {
    fn matrix_for(&self, locations: &[(f64, f64)]) -> Result<DistanceMatrix> {
        Ok(Self::build(locations))
    }
}
