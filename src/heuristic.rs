//! Geometry-only routing: slice, nearest neighbour, 2-opt.
//!
//! Capacity and time are not enforced. Loads are still reported on the
//! resulting routes.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::optimizer::{HeuristicOptions, RouteSolution, RoutingProblem};
use crate::traits::DistanceMatrix;

/// Moves must shorten the tour by more than this to count.
const MIN_GAIN: f64 = 1e-9;

pub(crate) fn solve(problem: &RoutingProblem, options: &HeuristicOptions) -> RouteSolution {
    let mut deliveries = problem.deliveries();
    if options.randomize {
        let mut rng = StdRng::seed_from_u64(options.seed);
        deliveries.shuffle(&mut rng);
    }

    let assignments = split_evenly(&deliveries, problem.vehicles.len())
        .into_iter()
        .zip(&problem.vehicles)
        .map(|(nodes, vehicle)| {
            let tour = nearest_neighbor_tour(&problem.distance_matrix, vehicle.depot_index, &nodes);
            let tour = two_opt(&problem.distance_matrix, tour);
            tour[1..tour.len() - 1].to_vec()
        })
        .collect();

    RouteSolution::from_assignments(problem, assignments)
}

/// Split `nodes` into `parts` contiguous slices whose sizes differ by at
/// most one; earlier slices take the remainder.
pub fn split_evenly(nodes: &[usize], parts: usize) -> Vec<Vec<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    let base = nodes.len() / parts;
    let extra = nodes.len() % parts;

    let mut slices = Vec::with_capacity(parts);
    let mut start = 0;
    for part in 0..parts {
        let size = base + usize::from(part < extra);
        slices.push(nodes[start..start + size].to_vec());
        start += size;
    }
    slices
}

/// Closed tour from `depot` that always moves to the closest unvisited
/// node. Ties go to the node listed first.
pub fn nearest_neighbor_tour(matrix: &DistanceMatrix, depot: usize, nodes: &[usize]) -> Vec<usize> {
    let mut remaining = nodes.to_vec();
    let mut tour = Vec::with_capacity(nodes.len() + 2);
    tour.push(depot);

    let mut current = depot;
    while !remaining.is_empty() {
        let mut best = 0;
        for (pos, &node) in remaining.iter().enumerate().skip(1) {
            if matrix[current][node] < matrix[current][remaining[best]] {
                best = pos;
            }
        }
        current = remaining.remove(best);
        tour.push(current);
    }

    tour.push(depot);
    tour
}

/// Total distance of a closed tour.
pub fn tour_distance(matrix: &DistanceMatrix, tour: &[usize]) -> f64 {
    tour.windows(2).map(|leg| matrix[leg[0]][leg[1]]).sum()
}

/// Best-improvement 2-opt on a closed tour whose endpoints are fixed.
///
/// Each step replaces edges (i-1, i) and (j, j+1) with (i-1, j) and
/// (i, j+1) for the pair that shortens the tour the most, reversing the
/// segment between them. Stops at a local optimum.
pub fn two_opt(matrix: &DistanceMatrix, mut tour: Vec<usize>) -> Vec<usize> {
    if tour.len() < 4 {
        return tour;
    }
    let last = tour.len() - 1;

    loop {
        let mut best: Option<(f64, usize, usize)> = None;
        for i in 1..last - 1 {
            for j in i + 1..last {
                let (a, b) = (tour[i - 1], tour[i]);
                let (c, d) = (tour[j], tour[j + 1]);
                let delta = matrix[a][c] + matrix[b][d] - matrix[a][b] - matrix[c][d];
                if delta < -MIN_GAIN && best.is_none_or(|(gain, _, _)| delta < gain) {
                    best = Some((delta, i, j));
                }
            }
        }

        match best {
            Some((_, i, j)) => tour[i..=j].reverse(),
            None => return tour,
        }
    }
}
