use jiff::{SignedDuration, Timestamp};
use serde::Serialize;
use tracing::warn;

use crate::problem::{
    amount::Amount,
    eval::{Cost, Distance},
    job::{JobRank, LocationId, Priority},
    vehicle::VehicleRank,
    vehicle_routing_problem::VehicleRoutingProblem,
};
use crate::solver::insertion::{priority_sum_for_route, route_eval_for_vehicle};
use crate::solver::solution::tw_route::TwRoute;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Start,
    Job,
    Break,
    End,
}

#[derive(Serialize, Debug, Clone)]
pub struct Step {
    pub kind: StepKind,
    pub job_rank: Option<JobRank>,
    pub location: Option<LocationId>,
    pub arrival: Timestamp,
    pub service_start: Timestamp,
    pub departure: Timestamp,
}

#[derive(Serialize, Debug, Clone)]
pub struct SolutionRoute {
    pub v_rank: VehicleRank,
    pub steps: Vec<Step>,
    pub cost: Cost,
    pub duration: SignedDuration,
    pub distance: Distance,
    pub setup: SignedDuration,
    pub service: SignedDuration,
    pub waiting_time: SignedDuration,
    pub priority: Priority,
    pub delivery: Amount,
    pub pickup: Amount,
    /// Time-window overruns tolerated under soft-pinned timing.
    pub violations: u32,
}

impl SolutionRoute {
    pub fn job_ranks(&self) -> Vec<JobRank> {
        self.steps.iter().filter_map(|step| step.job_rank).collect()
    }
}

#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputingTimes {
    pub loading: SignedDuration,
    pub solving: SignedDuration,
}

#[derive(Serialize, Debug, Clone)]
pub struct Summary {
    pub routes: u32,
    pub unassigned: u32,
    pub cost: Cost,
    pub delivery: Amount,
    pub pickup: Amount,
    pub setup: SignedDuration,
    pub service: SignedDuration,
    pub priority: Priority,
    pub duration: SignedDuration,
    pub distance: Distance,
    pub waiting_time: SignedDuration,
    pub violations: u32,
    pub computing_times: ComputingTimes,
}

impl Summary {
    pub fn new(problem: &VehicleRoutingProblem, routes: u32, unassigned: u32) -> Self {
        Summary {
            routes,
            unassigned,
            cost: 0,
            delivery: problem.zero_amount().clone(),
            pickup: problem.zero_amount().clone(),
            setup: SignedDuration::ZERO,
            service: SignedDuration::ZERO,
            priority: 0,
            duration: SignedDuration::ZERO,
            distance: 0,
            waiting_time: SignedDuration::ZERO,
            violations: 0,
            computing_times: ComputingTimes::default(),
        }
    }

    pub fn aggregate_route(&mut self, route: &SolutionRoute) {
        self.cost = self.cost.saturating_add(route.cost);
        self.delivery += &route.delivery;
        self.pickup += &route.pickup;
        self.setup += route.setup;
        self.service += route.service;
        self.priority += route.priority;
        self.duration += route.duration;
        self.distance = self.distance.saturating_add(route.distance);
        self.waiting_time += route.waiting_time;
        self.violations += route.violations;
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Solution {
    pub routes: Vec<SolutionRoute>,
    pub unassigned: Vec<JobRank>,
    pub summary: Summary,
}

/// Renders a scheduled route into typed steps with totals. The walk replays
/// travel and break services against the committed `earliest` dates, so a
/// soft-pinned overrun shows up as a violation instead of being hidden by
/// the clamp.
pub fn format_route(problem: &VehicleRoutingProblem, tw_route: &TwRoute) -> SolutionRoute {
    let v_rank = tw_route.v_rank;
    let vehicle = problem.vehicle(v_rank);
    let breaks = vehicle.breaks();
    let n = tw_route.route.len();

    let mut steps = Vec::with_capacity(n + breaks.len() + 2);
    let mut setup = SignedDuration::ZERO;
    let mut service = SignedDuration::ZERO;
    let mut waiting_time = SignedDuration::ZERO;
    let mut violations = 0;

    let mut cursor = tw_route.v_start;
    let mut previous_location = vehicle.start_location();

    // Start time is pulled back so the vehicle reaches the first stop right
    // at its scheduled date.
    let route_start = if n > 0 {
        let first_scheduled = if tw_route.breaks_at_rank[0] > 0 {
            tw_route.break_earliest[0]
        } else {
            tw_route.earliest[0]
        };
        let first_travel = match previous_location {
            Some(start) => problem.duration(
                v_rank,
                start,
                problem.job(tw_route.route[0]).location_id(),
            ),
            None => SignedDuration::ZERO,
        };
        first_scheduled
            .saturating_sub(first_travel).expect("duration math stays within hour-scale spans")
            .clamp(tw_route.v_start, tw_route.v_end)
    } else {
        tw_route.v_start
    };
    cursor = cursor.max(route_start);

    if let Some(start) = vehicle.start_location() {
        steps.push(Step {
            kind: StepKind::Start,
            job_rank: None,
            location: Some(start),
            arrival: cursor,
            service_start: cursor,
            departure: cursor,
        });
    }

    let mut break_rank = 0;
    for i in 0..n {
        let job = problem.job(tw_route.route[i]);

        for _ in 0..tw_route.breaks_at_rank[i] {
            let b = &breaks[break_rank];
            let service_start = cursor.max(tw_route.break_earliest[break_rank]);
            waiting_time += service_start.duration_since(cursor).max(SignedDuration::ZERO);
            steps.push(Step {
                kind: StepKind::Break,
                job_rank: None,
                location: previous_location,
                arrival: cursor,
                service_start,
                departure: service_start.saturating_add(b.service()).expect("duration math stays within hour-scale spans"),
            });
            cursor = service_start.saturating_add(b.service()).expect("duration math stays within hour-scale spans");
            break_rank += 1;
        }

        let travel = match previous_location {
            Some(previous) => problem.duration(v_rank, previous, job.location_id()),
            None => SignedDuration::ZERO,
        };
        let arrival = cursor.saturating_add(travel).expect("duration math stays within hour-scale spans");
        let service_start = arrival.max(tw_route.earliest[i]);

        if !job.time_windows().is_satisfied(service_start) {
            violations += 1;
        }

        let job_setup = tw_route.action_time[i] - job.service(tw_route.v_type);
        setup += job_setup;
        service += job.service(tw_route.v_type);
        waiting_time += service_start.duration_since(arrival).max(SignedDuration::ZERO);

        let departure = service_start
            .saturating_add(tw_route.action_time[i])
            .expect("duration math stays within hour-scale spans");
        steps.push(Step {
            kind: StepKind::Job,
            job_rank: Some(tw_route.route[i]),
            location: Some(job.location_id()),
            arrival,
            service_start,
            departure,
        });

        cursor = departure;
        previous_location = Some(job.location_id());
    }

    // Trailing breaks.
    for _ in 0..tw_route.breaks_at_rank.get(n).copied().unwrap_or(0) {
        let b = &breaks[break_rank];
        let service_start = cursor.max(tw_route.break_earliest[break_rank]);
        waiting_time += service_start.duration_since(cursor).max(SignedDuration::ZERO);
        steps.push(Step {
            kind: StepKind::Break,
            job_rank: None,
            location: previous_location,
            arrival: cursor,
            service_start,
            departure: service_start.saturating_add(b.service()).expect("duration math stays within hour-scale spans"),
        });
        cursor = service_start.saturating_add(b.service()).expect("duration math stays within hour-scale spans");
        break_rank += 1;
    }

    if let Some(end) = vehicle.end_location() {
        let travel = match previous_location {
            Some(previous) => problem.duration(v_rank, previous, end),
            None => SignedDuration::ZERO,
        };
        let arrival = cursor
            .saturating_add(travel)
            .expect("duration math stays within hour-scale spans");
        steps.push(Step {
            kind: StepKind::End,
            job_rank: None,
            location: Some(end),
            arrival,
            service_start: arrival,
            departure: arrival,
        });
        cursor = arrival;
    }

    let eval = route_eval_for_vehicle(problem, v_rank, &tw_route.route);
    let cost = if n > 0 {
        eval.cost.saturating_add(vehicle.fixed_cost())
    } else {
        0
    };

    SolutionRoute {
        v_rank,
        cost,
        duration: cursor.duration_since(route_start),
        distance: eval.distance,
        setup,
        service,
        waiting_time,
        priority: priority_sum_for_route(problem, &tw_route.route),
        delivery: tw_route.job_deliveries_sum().clone(),
        pickup: tw_route.job_pickups_sum().clone(),
        violations,
        steps,
    }
}

pub fn format_solution(
    problem: &VehicleRoutingProblem,
    tw_routes: &[TwRoute],
    unassigned: Vec<JobRank>,
) -> Solution {
    let routes: Vec<SolutionRoute> = tw_routes
        .iter()
        .filter(|tw_route| !tw_route.route.is_empty())
        .map(|tw_route| format_route(problem, tw_route))
        .collect();

    let mut solution = Solution {
        summary: Summary::new(problem, routes.len() as u32, unassigned.len() as u32),
        routes,
        unassigned,
    };
    for route in &solution.routes {
        solution.summary.aggregate_route(route);
    }

    validate_first_leg_limits(problem, &mut solution);

    solution
}

/// Final guard for the first-leg distance bound: any route starting with a
/// leg longer than the vehicle's limit is dropped and its jobs returned to
/// the unassigned pool. Seeded vehicles are exempt, as during the solve.
pub fn validate_first_leg_limits(problem: &VehicleRoutingProblem, solution: &mut Solution) {
    let mut dropped_jobs: Vec<JobRank> = Vec::new();

    solution.routes.retain(|route| {
        let vehicle = problem.vehicle(route.v_rank);
        let (Some(start), Some(limit)) = (vehicle.start_location(), vehicle.max_first_leg_distance())
        else {
            return true;
        };
        if !problem.seeded_ranks(route.v_rank).is_empty() {
            return true;
        }
        let Some(&first_job) = route.job_ranks().first() else {
            return true;
        };

        let first_leg =
            problem.distance(route.v_rank, start, problem.job(first_job).location_id());
        if first_leg <= limit {
            return true;
        }

        warn!(
            vehicle = vehicle.external_id(),
            first_leg, limit, "dropping route over its first leg distance limit"
        );
        dropped_jobs.extend(route.job_ranks());
        false
    });

    if !dropped_jobs.is_empty() {
        let computing_times = solution.summary.computing_times;
        solution.unassigned.extend(dropped_jobs);

        let mut summary = Summary::new(
            problem,
            solution.routes.len() as u32,
            solution.unassigned.len() as u32,
        );
        for route in &solution.routes {
            summary.aggregate_route(route);
        }
        summary.computing_times = computing_times;
        solution.summary = summary;
    }
}
