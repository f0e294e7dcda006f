use crate::problem::{
    eval::{Cost, Eval},
    vehicle::VehicleRank,
    vehicle_routing_problem::VehicleRoutingProblem,
};
use crate::solver::solution::raw_route::RawRoute;

/// Per-route prefix-sum caches kept by a search task. After an O(n) refresh
/// per modified route, range-replacement candidates cost O(1) each.
#[derive(Clone)]
pub struct SolutionState {
    /// fwd_costs[v][v2][i]: cumulative eval of the edges of v's route up to
    /// rank i, priced with vehicle v2.
    pub fwd_costs: Vec<Vec<Vec<Eval>>>,
    /// Same, traversing the route in reverse orientation.
    pub bwd_costs: Vec<Vec<Vec<Eval>>>,
    /// fwd_penalties[v][v2][i]: cumulative per-(job, vehicle) penalties of
    /// v's route up to and including rank i, with respect to vehicle v2.
    pub fwd_penalties: Vec<Vec<Vec<Cost>>>,
}

impl SolutionState {
    pub fn new(problem: &VehicleRoutingProblem) -> Self {
        let nb_vehicles = problem.vehicles().len();

        SolutionState {
            fwd_costs: vec![vec![Vec::new(); nb_vehicles]; nb_vehicles],
            bwd_costs: vec![vec![Vec::new(); nb_vehicles]; nb_vehicles],
            fwd_penalties: vec![vec![Vec::new(); nb_vehicles]; nb_vehicles],
        }
    }

    /// Refreshes all caches for one route against every vehicle.
    pub fn update_route_state(&mut self, problem: &VehicleRoutingProblem, route: &RawRoute) {
        let v = route.v_rank;
        let n = route.route.len();

        for v2 in 0..problem.vehicles().len() {
            let fwd = &mut self.fwd_costs[v][v2];
            let bwd = &mut self.bwd_costs[v][v2];
            let penalties = &mut self.fwd_penalties[v][v2];
            fwd.resize(n, Eval::default());
            bwd.resize(n, Eval::default());
            penalties.resize(n, 0);

            let mut current_fwd = Eval::default();
            let mut current_bwd = Eval::default();
            let mut current_penalty: Cost = 0;

            for i in 0..n {
                if i > 0 {
                    let previous_index = problem.job(route.route[i - 1]).location_id();
                    let current_index = problem.job(route.route[i]).location_id();
                    current_fwd += problem.eval(v2, previous_index, current_index);
                    current_bwd += problem.eval(v2, current_index, previous_index);
                }
                fwd[i] = current_fwd;
                bwd[i] = current_bwd;

                current_penalty =
                    current_penalty.saturating_add(problem.job_vehicle_penalty(route.route[i], v2));
                penalties[i] = current_penalty;
            }
        }
    }

    pub fn setup(&mut self, problem: &VehicleRoutingProblem, routes: &[RawRoute]) {
        for route in routes {
            self.update_route_state(problem, route);
        }
    }
}

/// Sum of per-(job, vehicle) penalties over ranks [first_rank; last_rank) of
/// `route_vehicle`'s route, with respect to `target_vehicle`.
pub fn penalty_sum_for_range(
    state: &SolutionState,
    route_vehicle: VehicleRank,
    target_vehicle: VehicleRank,
    first_rank: usize,
    last_rank: usize,
) -> Cost {
    debug_assert!(first_rank <= last_rank);
    if last_rank == first_rank {
        return 0;
    }

    let prefix = &state.fwd_penalties[route_vehicle][target_vehicle];
    debug_assert!(last_rank <= prefix.len());
    if first_rank == 0 {
        prefix[last_rank - 1]
    } else {
        prefix[last_rank - 1] - prefix[first_rank - 1]
    }
}
