use jiff::SignedDuration;

use crate::problem::{
    eval::{Cost, Eval},
    job::{Job, JobRank, LocationId, Priority},
    vehicle::VehicleRank,
    vehicle_routing_problem::VehicleRoutingProblem,
};
use crate::solver::solution::{
    raw_route::RawRoute,
    solution_state::{penalty_sum_for_range, SolutionState},
};

/// Travel-only eval delta when inserting a single job at the given rank:
/// subtract the replaced edge, add the two new ones.
pub fn addition_cost_travel(
    problem: &VehicleRoutingProblem,
    job_rank: JobRank,
    v_rank: VehicleRank,
    route: &[JobRank],
    rank: usize,
) -> Eval {
    debug_assert!(rank <= route.len());

    let vehicle = problem.vehicle(v_rank);
    let job_index = problem.job(job_rank).location_id();
    let mut previous_eval = Eval::default();
    let mut next_eval = Eval::default();
    let mut old_edge_eval = Eval::default();

    if rank == route.len() {
        if route.is_empty() {
            if let Some(start) = vehicle.start_location() {
                previous_eval = problem.eval(v_rank, start, job_index);
            }
            if let Some(end) = vehicle.end_location() {
                next_eval = problem.eval(v_rank, job_index, end);
            }
        } else {
            // Appending after the last job.
            let p_index = problem.job(route[rank - 1]).location_id();
            previous_eval = problem.eval(v_rank, p_index, job_index);
            if let Some(end) = vehicle.end_location() {
                old_edge_eval = problem.eval(v_rank, p_index, end);
                next_eval = problem.eval(v_rank, job_index, end);
            }
        }
    } else {
        // Inserting before one of the jobs.
        let n_index = problem.job(route[rank]).location_id();
        next_eval = problem.eval(v_rank, job_index, n_index);

        if rank == 0 {
            if let Some(start) = vehicle.start_location() {
                previous_eval = problem.eval(v_rank, start, job_index);
                old_edge_eval = problem.eval(v_rank, start, n_index);
            }
        } else {
            let p_index = problem.job(route[rank - 1]).location_id();
            previous_eval = problem.eval(v_rank, p_index, job_index);
            old_edge_eval = problem.eval(v_rank, p_index, n_index);
        }
    }

    previous_eval + next_eval - old_edge_eval
}

/// Objective delta for a single-job insertion, including the per-(job,
/// vehicle) penalty.
pub fn addition_cost(
    problem: &VehicleRoutingProblem,
    job_rank: JobRank,
    v_rank: VehicleRank,
    route: &[JobRank],
    rank: usize,
) -> Eval {
    let mut eval = addition_cost_travel(problem, job_rank, v_rank, route, rank);
    eval.cost = eval
        .cost
        .saturating_add(problem.job_vehicle_penalty(job_rank, v_rank));
    eval
}

/// Travel-only eval delta when inserting a pickup at `pickup_rank` and its
/// delivery at `delivery_rank` counted in the route *with* the pickup.
pub fn addition_cost_travel_pd(
    problem: &VehicleRoutingProblem,
    job_rank: JobRank,
    v_rank: VehicleRank,
    route: &[JobRank],
    pickup_rank: usize,
    delivery_rank: usize,
) -> Eval {
    debug_assert!(pickup_rank < delivery_rank && delivery_rank <= route.len() + 1);

    let vehicle = problem.vehicle(v_rank);
    let mut eval = addition_cost_travel(problem, job_rank, v_rank, route, pickup_rank);

    if delivery_rank == pickup_rank + 1 {
        // Delivery is inserted right after the pickup.
        let p_index = problem.job(job_rank).location_id();
        let d_index = problem.job(job_rank + 1).location_id();
        eval += problem.eval(v_rank, p_index, d_index);

        let mut after_delivery = Eval::default();
        let mut remove_after_pickup = Eval::default();

        if pickup_rank == route.len() {
            if let Some(end) = vehicle.end_location() {
                after_delivery = problem.eval(v_rank, d_index, end);
                remove_after_pickup = problem.eval(v_rank, p_index, end);
            }
        } else {
            let next_index = problem.job(route[pickup_rank]).location_id();
            after_delivery = problem.eval(v_rank, d_index, next_index);
            remove_after_pickup = problem.eval(v_rank, p_index, next_index);
        }

        eval += after_delivery;
        eval -= remove_after_pickup;
    } else {
        // Disjoint edge sets for pickup and delivery additions.
        eval += addition_cost_travel(problem, job_rank + 1, v_rank, route, delivery_rank - 1);
    }

    eval
}

/// Objective delta for a shipment insertion. The penalty applies once, on the
/// pickup.
pub fn addition_cost_pd(
    problem: &VehicleRoutingProblem,
    job_rank: JobRank,
    v_rank: VehicleRank,
    route: &[JobRank],
    pickup_rank: usize,
    delivery_rank: usize,
) -> Eval {
    let mut eval =
        addition_cost_travel_pd(problem, job_rank, v_rank, route, pickup_rank, delivery_rank);
    eval.cost = eval
        .cost
        .saturating_add(problem.job_vehicle_penalty(job_rank, v_rank));
    eval
}

fn range_indices(
    problem: &VehicleRoutingProblem,
    route: &RawRoute,
    first_rank: usize,
    last_rank: usize,
) -> (Option<LocationId>, Option<LocationId>, Option<LocationId>) {
    let r = &route.route;
    let vehicle = problem.vehicle(route.v_rank);

    let before_first = if first_rank > 0 {
        Some(problem.job(r[first_rank - 1]).location_id())
    } else {
        vehicle.start_location()
    };

    let first_index = if first_rank < r.len() {
        Some(problem.job(r[first_rank]).location_id())
    } else {
        vehicle.end_location()
    };

    let last_index = if last_rank < r.len() {
        Some(problem.job(r[last_rank]).location_id())
    } else {
        vehicle.end_location()
    };

    (before_first, first_index, last_index)
}

/// Gain from removing the [first_rank; last_rank) portion: the travel of the
/// removed edges plus the removed jobs' penalties.
pub fn get_range_removal_gain(
    state: &SolutionState,
    v: VehicleRank,
    first_rank: usize,
    last_rank: usize,
) -> Eval {
    debug_assert!(first_rank <= last_rank);

    let mut removal_gain = Eval::default();

    if last_rank > first_rank {
        removal_gain += state.fwd_costs[v][v][last_rank - 1];
        removal_gain -= state.fwd_costs[v][v][first_rank];
        removal_gain.cost = removal_gain
            .cost
            .saturating_add(penalty_sum_for_range(state, v, v, first_rank, last_rank));
    }

    removal_gain
}

/// Objective gain for replacing [first_rank; last_rank) of route_1 with the
/// range [insertion_start; insertion_end) of route_2, evaluated at once for
/// the straight and reversed orientations.
#[allow(clippy::too_many_arguments)]
pub fn addition_cost_delta(
    problem: &VehicleRoutingProblem,
    state: &SolutionState,
    route_1: &RawRoute,
    first_rank: usize,
    last_rank: usize,
    route_2: &RawRoute,
    insertion_start: usize,
    insertion_end: usize,
) -> (Eval, Eval) {
    debug_assert!(first_rank <= last_rank);
    debug_assert!(last_rank <= route_1.route.len());
    debug_assert!(insertion_start <= insertion_end);

    let empty_insertion = insertion_start == insertion_end;

    let r1 = &route_1.route;
    let v1_rank = route_1.v_rank;
    let r2 = &route_2.route;
    let v2_rank = route_2.v_rank;
    let v1 = problem.vehicle(v1_rank);

    // Orientation-independent part.
    let mut cost_delta = get_range_removal_gain(state, v1_rank, first_rank, last_rank);

    // Orientation-dependent part.
    let mut straight_delta = Eval::default();
    let mut reversed_delta = Eval::default();
    if !empty_insertion {
        straight_delta += state.fwd_costs[v2_rank][v1_rank][insertion_start];
        straight_delta -= state.fwd_costs[v2_rank][v1_rank][insertion_end - 1];

        reversed_delta += state.bwd_costs[v2_rank][v1_rank][insertion_start];
        reversed_delta -= state.bwd_costs[v2_rank][v1_rank][insertion_end - 1];
    }

    // Inserted penalties depend on the target vehicle, not on orientation.
    // This is a gain, so penalties of inserted jobs are subtracted: negative
    // penalties (preferences) increase it.
    let inserted_penalty_cost =
        penalty_sum_for_range(state, v2_rank, v1_rank, insertion_start, insertion_end);
    straight_delta.cost = straight_delta.cost.saturating_sub(inserted_penalty_cost);
    reversed_delta.cost = reversed_delta.cost.saturating_sub(inserted_penalty_cost);

    let (before_first, first_index, last_index) =
        range_indices(problem, route_1, first_rank, last_rank);

    // Gain of the removed edge before the replaced range.
    if let (Some(before), Some(first), false) = (before_first, first_index, r1.is_empty()) {
        cost_delta += problem.eval(v1_rank, before, first);
    }

    if empty_insertion {
        if let (Some(before), Some(last)) = (before_first, last_index) {
            if !(first_rank == 0 && last_rank == r1.len()) {
                // Cost of the new edge bridging the removed range, except
                // when the route empties out.
                cost_delta -= problem.eval(v1_rank, before, last);
            }
        }
    } else {
        if let Some(before) = before_first {
            straight_delta -= problem.eval(
                v1_rank,
                before,
                problem.job(r2[insertion_start]).location_id(),
            );
            reversed_delta -= problem.eval(
                v1_rank,
                before,
                problem.job(r2[insertion_end - 1]).location_id(),
            );
        }

        if let Some(last) = last_index {
            straight_delta -= problem.eval(
                v1_rank,
                problem.job(r2[insertion_end - 1]).location_id(),
                last,
            );
            reversed_delta -= problem.eval(
                v1_rank,
                problem.job(r2[insertion_start]).location_id(),
                last,
            );
        }
    }

    // Gain of the removed edge after the replaced range.
    if let Some(last) = last_index {
        if last_rank > first_rank {
            let before_last = problem.job(r1[last_rank - 1]).location_id();
            cost_delta += problem.eval(v1_rank, before_last, last);
        }
    }

    // Fixed cost shows up when a route fills or empties.
    if r1.is_empty() && !empty_insertion {
        cost_delta.cost = cost_delta.cost.saturating_sub(v1.fixed_cost());
    }
    if empty_insertion && first_rank == 0 && last_rank == r1.len() {
        cost_delta.cost = cost_delta.cost.saturating_add(v1.fixed_cost());
    }

    (cost_delta + straight_delta, cost_delta + reversed_delta)
}

/// Objective gain when replacing the *non-empty* [first_rank; last_rank)
/// portion with a single job. The empty-range case is `addition_cost`.
pub fn addition_cost_delta_single(
    problem: &VehicleRoutingProblem,
    state: &SolutionState,
    route: &RawRoute,
    first_rank: usize,
    last_rank: usize,
    job_rank: JobRank,
) -> Eval {
    debug_assert!(first_rank < last_rank && !route.route.is_empty());
    debug_assert!(last_rank <= route.route.len());

    let r = &route.route;
    let v_rank = route.v_rank;
    let job_index = problem.job(job_rank).location_id();

    let mut cost_delta = get_range_removal_gain(state, v_rank, first_rank, last_rank);

    let (before_first, first_index, last_index) =
        range_indices(problem, route, first_rank, last_rank);

    if let (Some(before), Some(first)) = (before_first, first_index) {
        cost_delta += problem.eval(v_rank, before, first);
    }
    if let Some(before) = before_first {
        cost_delta -= problem.eval(v_rank, before, job_index);
    }
    if let Some(last) = last_index {
        cost_delta -= problem.eval(v_rank, job_index, last);
        let before_last = problem.job(r[last_rank - 1]).location_id();
        cost_delta += problem.eval(v_rank, before_last, last);
    }

    // Adding the job also adds its objective penalty for this vehicle.
    cost_delta.cost = cost_delta
        .cost
        .saturating_sub(problem.job_vehicle_penalty(job_rank, v_rank));

    cost_delta
}

/// Gain when removing `count` jobs starting at `rank`.
pub fn removal_cost_delta(
    problem: &VehicleRoutingProblem,
    state: &SolutionState,
    route: &RawRoute,
    rank: usize,
    count: usize,
) -> Eval {
    debug_assert!(!route.route.is_empty());
    debug_assert!(rank + count <= route.route.len());

    addition_cost_delta(problem, state, route, rank, rank + count, route, 0, 0).0
}

/// Eval delta for replacing the job at `rank` in place with another job.
pub fn in_place_delta_cost(
    problem: &VehicleRoutingProblem,
    job_rank: JobRank,
    v_rank: VehicleRank,
    route: &[JobRank],
    rank: usize,
) -> Eval {
    debug_assert!(!route.is_empty());

    let vehicle = problem.vehicle(v_rank);
    let new_index = problem.job(job_rank).location_id();

    let p_index = if rank == 0 {
        vehicle.start_location()
    } else {
        Some(problem.job(route[rank - 1]).location_id())
    };
    let n_index = if rank == route.len() - 1 {
        vehicle.end_location()
    } else {
        Some(problem.job(route[rank + 1]).location_id())
    };

    let mut eval = Eval::default();
    if let Some(p) = p_index {
        eval += problem.eval(v_rank, p, new_index);
    }
    if let Some(n) = n_index {
        eval += problem.eval(v_rank, new_index, n);
    }
    if let (Some(p), Some(n)) = (p_index, n_index) {
        eval -= problem.eval(v_rank, p, n);
    }

    eval
}

pub fn max_edge_eval(
    problem: &VehicleRoutingProblem,
    v_rank: VehicleRank,
    route: &[JobRank],
) -> Eval {
    let vehicle = problem.vehicle(v_rank);
    let mut max_eval = Eval::default();

    if let Some(&first) = route.first() {
        if let Some(start) = vehicle.start_location() {
            let start_to_first =
                problem.eval(v_rank, start, problem.job(first).location_id());
            max_eval = max_eval.max(start_to_first);
        }

        for window in route.windows(2) {
            let job_to_next = problem.eval(
                v_rank,
                problem.job(window[0]).location_id(),
                problem.job(window[1]).location_id(),
            );
            max_eval = max_eval.max(job_to_next);
        }

        if let Some(end) = vehicle.end_location() {
            let last = route.last().expect("route is not empty");
            let last_to_end = problem.eval(v_rank, problem.job(*last).location_id(), end);
            max_eval = max_eval.max(last_to_end);
        }
    }

    max_eval
}

/// Travel eval of a whole route, start and end edges included.
pub fn route_eval_for_vehicle(
    problem: &VehicleRoutingProblem,
    v_rank: VehicleRank,
    route: &[JobRank],
) -> Eval {
    let vehicle = problem.vehicle(v_rank);
    let mut eval = Eval::default();

    if let (Some(&first), Some(&last)) = (route.first(), route.last()) {
        if let Some(start) = vehicle.start_location() {
            eval += problem.eval(v_rank, start, problem.job(first).location_id());
        }
        for window in route.windows(2) {
            eval += problem.eval(
                v_rank,
                problem.job(window[0]).location_id(),
                problem.job(window[1]).location_id(),
            );
        }
        if let Some(end) = vehicle.end_location() {
            eval += problem.eval(v_rank, problem.job(last).location_id(), end);
        }
    }

    eval
}

pub fn priority_sum_for_route(problem: &VehicleRoutingProblem, route: &[JobRank]) -> Priority {
    route
        .iter()
        .map(|&job_rank| problem.job(job_rank).priority())
        .sum()
}

// -------- Budget helpers (route-level) --------

fn setup_for_prev(job: &Job, v_type: usize, prev_location: Option<LocationId>) -> SignedDuration {
    if prev_location == Some(job.location_id()) {
        SignedDuration::ZERO
    } else {
        job.setup(v_type)
    }
}

pub fn job_budget(job: &Job) -> Cost {
    // Shipments carry their budget once, on the pickup.
    if job.is_delivery() {
        return 0;
    }
    job.budget()
}

pub fn route_budget_sum(problem: &VehicleRoutingProblem, route: &[JobRank]) -> Cost {
    route
        .iter()
        .map(|&job_rank| job_budget(problem.job(job_rank)))
        .sum()
}

pub fn action_cost_from_duration(
    problem: &VehicleRoutingProblem,
    v_rank: VehicleRank,
    duration: SignedDuration,
) -> Cost {
    problem.vehicle(v_rank).cost_from_duration(duration)
}

/// Total setup + service time over a route, accounting for same-location
/// setup suppression.
pub fn route_action_time_duration(
    problem: &VehicleRoutingProblem,
    v_rank: VehicleRank,
    route: &[JobRank],
) -> SignedDuration {
    let vehicle = problem.vehicle(v_rank);
    let v_type = vehicle.type_rank();
    let mut total = SignedDuration::ZERO;
    let mut prev = vehicle.start_location();

    for &job_rank in route {
        let job = problem.job(job_rank);
        total += setup_for_prev(job, v_type, prev);
        total += job.service(v_type);
        prev = Some(job.location_id());
    }

    total
}

/// Action time added by inserting a single job: its own setup and service,
/// plus the change of setup for the job that now follows it.
pub fn action_time_delta_single(
    problem: &VehicleRoutingProblem,
    v_rank: VehicleRank,
    route: &[JobRank],
    job_rank: JobRank,
    insert_rank: usize,
) -> SignedDuration {
    let vehicle = problem.vehicle(v_rank);
    let v_type = vehicle.type_rank();
    let job = problem.job(job_rank);

    let prev = if insert_rank == 0 {
        vehicle.start_location()
    } else {
        Some(problem.job(route[insert_rank - 1]).location_id())
    };

    let mut delta = setup_for_prev(job, v_type, prev) + job.service(v_type);

    if insert_rank < route.len() {
        let next = problem.job(route[insert_rank]);
        let old_setup = setup_for_prev(next, v_type, prev);
        let new_setup = setup_for_prev(next, v_type, Some(job.location_id()));
        delta += new_setup - old_setup;
    }

    delta
}

/// Action time added by inserting a shipment with the delivery right after
/// the pickup.
pub fn action_time_delta_pd_contiguous(
    problem: &VehicleRoutingProblem,
    v_rank: VehicleRank,
    route: &[JobRank],
    pickup_rank_in_input: JobRank,
    insert_rank: usize,
) -> SignedDuration {
    let vehicle = problem.vehicle(v_rank);
    let v_type = vehicle.type_rank();
    let pickup = problem.job(pickup_rank_in_input);
    let delivery = problem.job(pickup_rank_in_input + 1);

    let prev = if insert_rank == 0 {
        vehicle.start_location()
    } else {
        Some(problem.job(route[insert_rank - 1]).location_id())
    };

    let mut delta = setup_for_prev(pickup, v_type, prev) + pickup.service(v_type);
    delta += setup_for_prev(delivery, v_type, Some(pickup.location_id()));
    delta += delivery.service(v_type);

    if insert_rank < route.len() {
        let next = problem.job(route[insert_rank]);
        let old_setup = setup_for_prev(next, v_type, prev);
        let new_setup = setup_for_prev(next, v_type, Some(delivery.location_id()));
        delta += new_setup - old_setup;
    }

    delta
}

/// Action time added by a shipment whose delivery sits further down the
/// route. Insertion ranks refer to the route before any insertion.
pub fn action_time_delta_pd_general(
    problem: &VehicleRoutingProblem,
    v_rank: VehicleRank,
    route: &[JobRank],
    pickup_insert_rank: usize,
    delivery_insert_rank: usize,
    pickup_rank_in_input: JobRank,
) -> SignedDuration {
    debug_assert!(delivery_insert_rank >= pickup_insert_rank);

    if delivery_insert_rank == pickup_insert_rank {
        return action_time_delta_pd_contiguous(
            problem,
            v_rank,
            route,
            pickup_rank_in_input,
            pickup_insert_rank,
        );
    }

    let vehicle = problem.vehicle(v_rank);
    let v_type = vehicle.type_rank();
    let pickup = problem.job(pickup_rank_in_input);
    let delivery = problem.job(pickup_rank_in_input + 1);

    // Pickup insertion effects.
    let prev_p = if pickup_insert_rank == 0 {
        vehicle.start_location()
    } else {
        Some(problem.job(route[pickup_insert_rank - 1]).location_id())
    };
    let mut delta = setup_for_prev(pickup, v_type, prev_p) + pickup.service(v_type);

    if pickup_insert_rank < route.len() {
        let next_after_p = problem.job(route[pickup_insert_rank]);
        let old_setup = setup_for_prev(next_after_p, v_type, prev_p);
        let new_setup = setup_for_prev(next_after_p, v_type, Some(pickup.location_id()));
        delta += new_setup - old_setup;
    }

    // Delivery insertion effects.
    let prev_d = Some(problem.job(route[delivery_insert_rank - 1]).location_id());
    delta += setup_for_prev(delivery, v_type, prev_d);
    delta += delivery.service(v_type);

    if delivery_insert_rank < route.len() {
        let next_after_d = problem.job(route[delivery_insert_rank]);
        let old_setup = setup_for_prev(next_after_d, v_type, prev_d);
        let new_setup = setup_for_prev(next_after_d, v_type, Some(delivery.location_id()));
        delta += new_setup - old_setup;
    }

    delta
}
