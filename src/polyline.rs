//! Route geometries as decoded coordinate sequences.
//!
//! Encoded polylines only appear at the OSRM boundary and are decoded
//! immediately.

use serde::{Deserialize, Serialize};

use crate::error::{PlannerError, Result};

/// Precision of OSRM's default `polyline` geometry (5 decimal places).
pub const OSRM_PRECISION: u32 = 5;

/// A route geometry as (latitude, longitude) points.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Polyline {
    points: Vec<(f64, f64)>,
}

impl Polyline {
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// Decode a Google encoded polyline string with the given decimal
    /// precision.
    pub fn decode(encoded: &str, precision: u32) -> Result<Self> {
        let factor = 10f64.powi(precision as i32);
        let bytes = encoded.as_bytes();
        let mut index = 0;
        let (mut lat, mut lng) = (0i64, 0i64);
        let mut points = Vec::new();

        while index < bytes.len() {
            lat += next_delta(bytes, &mut index)?;
            lng += next_delta(bytes, &mut index)?;
            points.push((lat as f64 / factor, lng as f64 / factor));
        }

        Ok(Self { points })
    }

    pub fn points(&self) -> &[(f64, f64)] {
        &self.points
    }

    pub fn into_points(self) -> Vec<(f64, f64)> {
        self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Read one zig-zag encoded varint starting at `index`.
fn next_delta(bytes: &[u8], index: &mut usize) -> Result<i64> {
    let mut result = 0i64;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*index).ok_or_else(|| malformed("truncated polyline"))?;
        *index += 1;
        let chunk = i64::from(byte)
            .checked_sub(63)
            .filter(|c| (0..64).contains(c))
            .ok_or_else(|| malformed("invalid polyline character"))?;
        if shift > 60 {
            return Err(malformed("polyline value overflow"));
        }
        result |= (chunk & 0x1f) << shift;
        shift += 5;
        if chunk < 0x20 {
            break;
        }
    }
    Ok(if result & 1 == 1 { !(result >> 1) } else { result >> 1 })
}

fn malformed(message: &str) -> PlannerError {
    PlannerError::Provider {
        provider: "osrm",
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reference_polyline() {
        let polyline = Polyline::decode("_p~iF~ps|U_ulLnnqC_mqNvxq`@", 5).unwrap();
        let expected = [(38.5, -120.2), (40.7, -120.95), (43.252, -126.453)];
        assert_eq!(polyline.points().len(), expected.len());
        for (got, want) in polyline.points().iter().zip(expected) {
            assert!((got.0 - want.0).abs() < 1e-9, "{:?} vs {:?}", got, want);
            assert!((got.1 - want.1).abs() < 1e-9, "{:?} vs {:?}", got, want);
        }
    }

    #[test]
    fn test_decode_empty() {
        assert!(Polyline::decode("", OSRM_PRECISION).unwrap().is_empty());
    }

    #[test]
    fn test_decode_truncated() {
        // continuation bit set on the last byte
        assert!(Polyline::decode("_p~iF~ps|", OSRM_PRECISION).is_err());
        assert!(Polyline::decode("_p~iF", OSRM_PRECISION).is_err());
    }

    #[test]
    fn test_into_points() {
        let points = vec![(38.5, -9.2), (38.7, -9.1)];
        let owned = Polyline::new(points.clone()).into_points();
        assert_eq!(owned, points);
    }
}
