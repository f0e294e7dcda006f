use jiff::SignedDuration;

use crate::problem::eval::{Cost, Distance};

/// Flat travel matrices for one routing profile. To find the entry for a pair
/// of locations use `index = from * num_locations + to`.
#[derive(Debug, Clone)]
pub struct TravelMatrices {
    durations: Vec<i64>,
    distances: Vec<i64>,
    costs: Option<Vec<i64>>,
    num_locations: usize,
    is_symmetric: bool,
}

fn flatten(matrix: Vec<Vec<i64>>) -> (Vec<i64>, usize, bool) {
    let num_locations = matrix.len();
    let is_symmetric = matrix
        .iter()
        .enumerate()
        .all(|(i, row)| row.iter().enumerate().all(|(j, &value)| matrix[j][i] == value));

    (matrix.into_iter().flatten().collect(), num_locations, is_symmetric)
}

impl TravelMatrices {
    pub fn new(
        durations: Vec<Vec<i64>>,
        distances: Vec<Vec<i64>>,
        costs: Option<Vec<Vec<i64>>>,
    ) -> Self {
        let (durations, num_locations, durations_symmetric) = flatten(durations);
        let (distances, distance_locations, distances_symmetric) = flatten(distances);
        assert_eq!(num_locations, distance_locations);

        let costs = costs.map(|costs| {
            let (costs, cost_locations, _) = flatten(costs);
            assert_eq!(num_locations, cost_locations);
            costs
        });

        TravelMatrices {
            durations,
            distances,
            costs,
            num_locations,
            is_symmetric: durations_symmetric && distances_symmetric,
        }
    }

    /// Duration-only input: distances mirror durations, costs derive from the
    /// vehicle's hourly rate.
    pub fn from_durations(durations: Vec<Vec<i64>>) -> Self {
        TravelMatrices::new(durations.clone(), durations, None)
    }

    #[inline(always)]
    fn get_index(&self, from: usize, to: usize) -> usize {
        from * self.num_locations + to
    }

    #[inline(always)]
    pub fn travel_time(&self, from: usize, to: usize) -> SignedDuration {
        if from == to {
            return SignedDuration::ZERO;
        }

        SignedDuration::from_secs(self.durations[self.get_index(from, to)])
    }

    #[inline(always)]
    pub fn travel_distance(&self, from: usize, to: usize) -> Distance {
        if from == to {
            return 0;
        }

        self.distances[self.get_index(from, to)]
    }

    #[inline(always)]
    pub fn travel_cost(&self, from: usize, to: usize) -> Option<Cost> {
        if from == to {
            return self.costs.as_ref().map(|_| 0);
        }

        self.costs
            .as_ref()
            .map(|costs| costs[self.get_index(from, to)])
    }

    pub fn num_locations(&self) -> usize {
        self.num_locations
    }

    pub fn is_symmetric(&self) -> bool {
        self.is_symmetric
    }
}
