use std::ops::Deref;

use jiff::{SignedDuration, Timestamp};
use smallvec::SmallVec;

use crate::problem::{
    amount::{is_capacity_satisfied, max_amount, Amount},
    error::ProblemError,
    job::{JobKind, JobRank, LocationId},
    time_window::TimeWindow,
    vehicle::{VehicleBreak, VehicleRank},
    vehicle_routing_problem::VehicleRoutingProblem,
};
use crate::solver::solution::raw_route::RawRoute;

type JobSequence = SmallVec<[JobRank; 8]>;

/// Earliest feasible state right before a candidate range: end of service at
/// the previous step and travel from there to the first candidate.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PreviousInfo {
    pub earliest: Timestamp,
    pub travel: SignedDuration,
    pub location: Option<LocationId>,
}

impl PreviousInfo {
    fn new(earliest: Timestamp) -> Self {
        PreviousInfo {
            earliest,
            travel: SignedDuration::ZERO,
            location: None,
        }
    }
}

/// Latest admissible state right after a candidate range.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NextInfo {
    pub latest: Timestamp,
    pub travel: SignedDuration,
}

/// Outcome of sequencing one job against one break. At most one of the two
/// flags is set; neither means the configuration is infeasible.
pub(crate) struct OrderChoice {
    pub add_job_first: bool,
    pub add_break_first: bool,
    pub j_tw: Option<TimeWindow>,
    pub b_tw: Option<TimeWindow>,
}

/// Time and break schedule for one vehicle's route, layered on RawRoute.
///
/// `earliest` / `latest` bound the service start at every rank, breaks are
/// assigned to inter-rank slots, and the smallest break load margins let
/// insertion candidates check break max-loads in O(1).
#[derive(Clone)]
pub struct TwRoute {
    raw: RawRoute,

    pub v_start: Timestamp,
    pub v_end: Timestamp,

    pub earliest: Vec<Timestamp>,
    pub latest: Vec<Timestamp>,

    /// Setup + service at each rank, setup suppressed when the previous stop
    /// shares the location.
    pub action_time: Vec<SignedDuration>,

    /// breaks_at_rank[i] breaks happen strictly before the job at rank i;
    /// slot route.len() collects the breaks after the last job.
    pub breaks_at_rank: Vec<usize>,
    /// Cumulative break counts, aligned with breaks_at_rank.
    pub breaks_counts: Vec<usize>,

    pub break_earliest: Vec<Timestamp>,
    pub break_latest: Vec<Timestamp>,

    /// Running component-wise minima of (break max-load - load), forward and
    /// backward. Saturated at the maximal amount for cap-less breaks.
    pub fwd_smallest_breaks_load_margin: Vec<Amount>,
    pub bwd_smallest_breaks_load_margin: Vec<Amount>,

    pub earliest_end: Timestamp,

    /// Service start per rank captured by the relaxed seed; soft-pin delay
    /// accounting measures added lateness against these.
    pub baseline_service_start: Vec<Timestamp>,
    pub is_pinned_step: Vec<bool>,
}

impl Deref for TwRoute {
    type Target = RawRoute;

    fn deref(&self) -> &RawRoute {
        &self.raw
    }
}

impl TwRoute {
    pub fn new(
        problem: &VehicleRoutingProblem,
        v_rank: VehicleRank,
    ) -> Result<Self, ProblemError> {
        let raw = RawRoute::new(problem, v_rank);
        let vehicle = problem.vehicle(v_rank);
        let v_start = vehicle.time_window().start();
        let v_end = vehicle.time_window().end();
        let breaks = vehicle.breaks();
        let amount_size = problem.amount_size();

        let break_error = || ProblemError::InconsistentBreaks {
            vehicle: vehicle.external_id().to_owned(),
        };

        let mut break_earliest = Vec::with_capacity(breaks.len());
        let mut fwd_smallest_breaks_load_margin = Vec::with_capacity(breaks.len());
        let mut previous_earliest = v_start;
        let mut fwd_smallest_margin = max_amount(amount_size);

        for b in breaks {
            let b_tw = b
                .time_windows()
                .first_fitting(previous_earliest)
                .ok_or_else(break_error)?;

            let earliest = previous_earliest.max(b_tw.start());
            break_earliest.push(earliest);
            previous_earliest = earliest
                .saturating_add(b.service())
                .expect("duration math stays within hour-scale spans");

            if let Some(max_load) = b.max_load() {
                fwd_smallest_margin.update_min(max_load);
            }
            fwd_smallest_breaks_load_margin.push(fwd_smallest_margin.clone());
        }

        let mut break_latest = vec![Timestamp::MIN; breaks.len()];
        let mut bwd_smallest_breaks_load_margin = vec![Amount::EMPTY; breaks.len()];
        let mut next_latest = v_end;
        let mut bwd_smallest_margin = max_amount(amount_size);

        for i in (0..breaks.len()).rev() {
            let b = &breaks[i];
            next_latest = next_latest
                .saturating_sub(b.service())
                .expect("duration math stays within hour-scale spans");

            let b_tw = b
                .time_windows()
                .last_fitting(next_latest)
                .ok_or_else(break_error)?;

            break_latest[i] = next_latest.min(b_tw.end());
            next_latest = break_latest[i];

            if break_latest[i] < break_earliest[i] {
                return Err(break_error());
            }

            if let Some(max_load) = b.max_load() {
                bwd_smallest_margin.update_min(max_load);
            }
            bwd_smallest_breaks_load_margin[i] = bwd_smallest_margin.clone();
        }

        Ok(TwRoute {
            raw,
            v_start,
            v_end,
            earliest: Vec::new(),
            latest: Vec::new(),
            action_time: Vec::new(),
            breaks_at_rank: vec![breaks.len()],
            breaks_counts: vec![breaks.len()],
            break_earliest,
            break_latest,
            fwd_smallest_breaks_load_margin,
            bwd_smallest_breaks_load_margin,
            earliest_end: v_start,
            baseline_service_start: Vec::new(),
            is_pinned_step: Vec::new(),
        })
    }

    /// Initializes the route while ignoring time windows: earliest dates are
    /// plain forward travel sums, latest dates a loose bound at vehicle end,
    /// and every break is parked in the trailing sentinel slot. Used to seed
    /// pinned workloads that may only be feasible under soft timing.
    pub fn seed_relaxed_from_job_ranks(
        &mut self,
        problem: &VehicleRoutingProblem,
        job_ranks: Vec<JobRank>,
    ) {
        self.raw.set_route(problem, job_ranks);

        let vehicle = problem.vehicle(self.raw.v_rank);
        let n = self.raw.route.len();
        self.earliest = vec![Timestamp::MIN; n];
        self.latest = vec![self.v_end; n];
        self.action_time = vec![SignedDuration::ZERO; n];
        self.breaks_at_rank = vec![0; n + 1];
        self.breaks_counts = vec![0; n + 1];
        self.baseline_service_start = vec![Timestamp::MIN; n];
        self.is_pinned_step = vec![false; n];

        let mut current_earliest = self.v_start;
        let mut previous_location = vehicle.start_location();

        for i in 0..n {
            let job = problem.job(self.raw.route[i]);
            if let Some(previous) = previous_location {
                current_earliest = current_earliest.saturating_add(problem.duration(
                    self.raw.v_rank,
                    previous,
                    job.location_id(),
                )).expect("REASON");
            }
            self.earliest[i] = current_earliest;
            self.baseline_service_start[i] = current_earliest;
            self.is_pinned_step[i] = job.pinned();

            let job_action_time = job.action_time(self.raw.v_type, previous_location);
            self.action_time[i] = job_action_time;
            current_earliest = current_earliest.saturating_add(job_action_time).expect("REASON");
            previous_location = Some(job.location_id());
        }

        // Park every vehicle break after the last job. The sentinel slot
        // keeps later update loops inside bounds.
        self.breaks_at_rank[n] = vehicle.breaks().len();
        self.breaks_counts[n] = vehicle.breaks().len();

        self.earliest_end = current_earliest;
    }

    pub(crate) fn previous_info(
        &self,
        problem: &VehicleRoutingProblem,
        job_rank: JobRank,
        rank: usize,
    ) -> PreviousInfo {
        let vehicle = problem.vehicle(self.raw.v_rank);
        let job = problem.job(job_rank);

        let mut previous = PreviousInfo::new(self.v_start);
        if rank > 0 {
            let previous_job = problem.job(self.raw.route[rank - 1]);
            previous.earliest = self.earliest[rank - 1].saturating_add(self.action_time[rank - 1]).expect("REASON");
            previous.travel = problem.duration(
                self.raw.v_rank,
                previous_job.location_id(),
                job.location_id(),
            );
            previous.location = Some(previous_job.location_id());
        } else if let Some(start) = vehicle.start_location() {
            previous.location = Some(start);
            previous.travel = problem.duration(self.raw.v_rank, start, job.location_id());
        }

        previous
    }

    pub(crate) fn next_info(
        &self,
        problem: &VehicleRoutingProblem,
        job_rank: JobRank,
        rank: usize,
    ) -> NextInfo {
        let vehicle = problem.vehicle(self.raw.v_rank);
        let job = problem.job(job_rank);

        let mut next = NextInfo {
            latest: self.v_end,
            travel: SignedDuration::ZERO,
        };
        if rank == self.raw.route.len() {
            if let Some(end) = vehicle.end_location() {
                next.travel = problem.duration(self.raw.v_rank, job.location_id(), end);
            }
        } else {
            next.latest = self.latest[rank];
            next.travel = problem.duration(
                self.raw.v_rank,
                job.location_id(),
                problem.job(self.raw.route[rank]).location_id(),
            );
        }

        next
    }

    /// Sweeps forward from rank, updating earliest dates for jobs and breaks
    /// until propagation stabilizes. Under soft timing an unreachable window
    /// clamps to its end instead of failing.
    pub(crate) fn fwd_update_earliest_from(
        &mut self,
        problem: &VehicleRoutingProblem,
        rank: usize,
    ) {
        let vehicle = problem.vehicle(self.raw.v_rank);
        let breaks = vehicle.breaks();
        let n = self.raw.route.len();

        let mut current_earliest = self.earliest[rank];
        let mut handle_last_breaks = true;

        for i in rank + 1..n {
            let next_job = problem.job(self.raw.route[i]);
            let mut remaining_travel = problem.duration(
                self.raw.v_rank,
                problem.job(self.raw.route[i - 1]).location_id(),
                next_job.location_id(),
            );
            let mut previous_action_time = self.action_time[i - 1];

            debug_assert!(self.breaks_at_rank[i] <= self.breaks_counts[i]);
            let mut break_rank = self.breaks_counts[i] - self.breaks_at_rank[i];
            let mut clamped_on_break = false;

            for _ in 0..self.breaks_at_rank[i] {
                let b = &breaks[break_rank];
                current_earliest = current_earliest.saturating_add(previous_action_time).expect("REASON");

                let Some(b_tw) = b.time_windows().first_fitting(current_earliest) else {
                    // Soft-pinned slack can push a break past every window.
                    // Keep the best effort instead of failing.
                    current_earliest = b.time_windows().back().end();
                    self.break_earliest[break_rank] = current_earliest;
                    handle_last_breaks = false;
                    clamped_on_break = true;
                    break;
                };

                if current_earliest < b_tw.start() {
                    let margin = b_tw.start().duration_since(current_earliest);
                    if margin < remaining_travel {
                        remaining_travel -= margin;
                    } else {
                        remaining_travel = SignedDuration::ZERO;
                    }
                    current_earliest = b_tw.start();
                }

                self.break_earliest[break_rank] = current_earliest;
                previous_action_time = b.service();
                break_rank += 1;
            }
            if clamped_on_break {
                break;
            }

            current_earliest = current_earliest
                .saturating_add(previous_action_time).expect("REASON")
                .saturating_add(remaining_travel).expect("REASON");

            let Some(j_tw) = next_job.time_windows().first_fitting(current_earliest) else {
                // Same clamp for jobs drifting past their last window.
                current_earliest = next_job.time_windows().back().end();
                self.earliest[i] = current_earliest;
                handle_last_breaks = false;
                break;
            };

            current_earliest = current_earliest.max(j_tw.start());

            // Latest dates still holding the replace sentinel are refreshed
            // by the backward sweep right after this call.
            debug_assert!(
                current_earliest <= self.latest[i]
                    || self.latest[i] == Timestamp::MIN
                    || problem.pinned_soft_timing()
            );
            if current_earliest == self.earliest[i] {
                // No further change, stop propagating.
                handle_last_breaks = false;
                break;
            }

            self.earliest[i] = current_earliest;
        }

        if handle_last_breaks {
            // Breaks right before the route end.
            let mut remaining_travel = match vehicle.end_location() {
                Some(end) => problem.duration(
                    self.raw.v_rank,
                    problem.job(self.raw.route[n - 1]).location_id(),
                    end,
                ),
                None => SignedDuration::ZERO,
            };
            let mut previous_action_time = self.action_time[n - 1];

            debug_assert!(self.breaks_at_rank[n] <= self.breaks_counts[n]);
            let mut break_rank = self.breaks_counts[n] - self.breaks_at_rank[n];

            for _ in 0..self.breaks_at_rank[n] {
                let b = &breaks[break_rank];
                current_earliest = current_earliest.saturating_add(previous_action_time).expect("REASON");

                let Some(b_tw) = b.time_windows().first_fitting(current_earliest) else {
                    current_earliest = b.time_windows().back().end();
                    self.break_earliest[break_rank] = current_earliest;
                    break;
                };

                if current_earliest < b_tw.start() {
                    let margin = b_tw.start().duration_since(current_earliest);
                    if margin < remaining_travel {
                        remaining_travel -= margin;
                    } else {
                        remaining_travel = SignedDuration::ZERO;
                    }
                    current_earliest = b_tw.start();
                }

                self.break_earliest[break_rank] = current_earliest;
                previous_action_time = b.service();
                break_rank += 1;
            }

            self.earliest_end = current_earliest
                .saturating_add(previous_action_time).expect("REASON")
                .saturating_add(remaining_travel).expect("REASON");
            debug_assert!(self.earliest_end <= self.v_end || problem.pinned_soft_timing());
        }
    }

    /// Backward counterpart of `fwd_update_earliest_from`.
    pub(crate) fn bwd_update_latest_from(
        &mut self,
        problem: &VehicleRoutingProblem,
        rank: usize,
    ) {
        let vehicle = problem.vehicle(self.raw.v_rank);
        let breaks = vehicle.breaks();
        let n = self.raw.route.len();
        debug_assert!(n > 0);

        // Callers sometimes ask for "after last job" when soft-pinned ranges
        // overflow; clamp to the last job.
        let rank = rank.min(n - 1);

        let mut current_latest = self.latest[rank];
        let mut handle_first_breaks = true;

        for next_i in (1..=rank).rev() {
            let previous_job = problem.job(self.raw.route[next_i - 1]);
            let mut remaining_travel = if next_i < n {
                problem.duration(
                    self.raw.v_rank,
                    previous_job.location_id(),
                    problem.job(self.raw.route[next_i]).location_id(),
                )
            } else {
                SignedDuration::ZERO
            };

            debug_assert!(self.breaks_at_rank[next_i] <= self.breaks_counts[next_i]);
            let mut break_rank = self.breaks_counts[next_i];

            for _ in 0..self.breaks_at_rank[next_i] {
                break_rank -= 1;
                let b = &breaks[break_rank];
                current_latest = current_latest.saturating_sub(b.service()).expect("REASON");

                let Some(b_tw) = b.time_windows().last_fitting(current_latest) else {
                    // Soft timing may leave a break past its windows; clamp
                    // and carry on.
                    current_latest = b.time_windows().back().end();
                    self.break_latest[break_rank] = current_latest;
                    continue;
                };

                if b_tw.end() < current_latest {
                    let margin = current_latest.duration_since(b_tw.end());
                    if margin < remaining_travel {
                        remaining_travel -= margin;
                    } else {
                        remaining_travel = SignedDuration::ZERO;
                    }
                    current_latest = b_tw.end();
                }

                self.break_latest[break_rank] = current_latest;
            }

            let gap = self.action_time[next_i - 1] + remaining_travel;
            current_latest = current_latest.saturating_sub(gap).expect("REASON");

            let Some(j_tw) = previous_job.time_windows().last_fitting(current_latest) else {
                // No window can take the late arrival; keep the last end so
                // propagation continues.
                current_latest = previous_job.time_windows().back().end();
                self.latest[next_i - 1] = current_latest;
                continue;
            };

            current_latest = current_latest.min(j_tw.end());

            if current_latest < self.earliest[next_i - 1] {
                // Soft pins may keep a job past its window; clamp so
                // downstream slack stays non-negative.
                current_latest = self.earliest[next_i - 1];
            }
            if current_latest == self.latest[next_i - 1] {
                handle_first_breaks = false;
                break;
            }

            self.latest[next_i - 1] = current_latest;
        }

        if handle_first_breaks {
            // Breaks before the first job.
            debug_assert!(self.breaks_at_rank[0] <= self.breaks_counts[0]);
            let mut break_rank = self.breaks_counts[0];

            for _ in 0..self.breaks_at_rank[0] {
                break_rank -= 1;
                let b = &breaks[break_rank];
                current_latest = current_latest.saturating_sub(b.service()).expect("REASON");

                let Some(b_tw) = b.time_windows().last_fitting(current_latest) else {
                    current_latest = b.time_windows().back().end();
                    self.break_latest[break_rank] = current_latest;
                    continue;
                };

                if b_tw.end() < current_latest {
                    current_latest = b_tw.end();
                }

                self.break_latest[break_rank] = current_latest;
            }
        }
    }

    /// Recomputes `latest` for the last job from the vehicle end and the
    /// trailing breaks.
    pub(crate) fn update_last_latest_date(&mut self, problem: &VehicleRoutingProblem) {
        let n = self.raw.route.len();
        debug_assert!(n > 0);

        let vehicle = problem.vehicle(self.raw.v_rank);
        let breaks = vehicle.breaks();
        let last_job_rank = self.raw.route[n - 1];
        let mut next = self.next_info(problem, last_job_rank, n);

        let mut break_rank = self.breaks_counts[n];
        for _ in 0..self.breaks_at_rank[n] {
            break_rank -= 1;
            let b = &breaks[break_rank];
            next.latest = next.latest.saturating_sub(b.service()).expect("REASON");

            let Some(b_tw) = b.time_windows().last_fitting(next.latest) else {
                next.latest = b.time_windows().back().end();
                self.break_latest[break_rank] = next.latest;
                continue;
            };

            if b_tw.end() < next.latest {
                let margin = next.latest.duration_since(b_tw.end());
                if margin < next.travel {
                    next.travel -= margin;
                } else {
                    next.travel = SignedDuration::ZERO;
                }
                next.latest = b_tw.end();
            }

            self.break_latest[break_rank] = next.latest;
        }

        let job = problem.job(last_job_rank);
        let gap = self.action_time[n - 1] + next.travel;
        next.latest = next.latest.saturating_sub(gap).expect("REASON");

        let latest = match job.time_windows().last_fitting(next.latest) {
            Some(j_tw) => next.latest.min(j_tw.end()),
            None => job.time_windows().back().end(),
        };
        self.latest[n - 1] = latest;
    }

    /// Recomputes action times after a location change at `rank`.
    pub(crate) fn fwd_update_action_time_from(
        &mut self,
        problem: &VehicleRoutingProblem,
        rank: usize,
    ) {
        let mut current_location = problem.job(self.raw.route[rank]).location_id();

        for i in rank + 1..self.raw.route.len() {
            let next_job = problem.job(self.raw.route[i]);
            self.action_time[i] = next_job.action_time(self.raw.v_type, Some(current_location));
            current_location = next_job.location_id();
        }
    }

    pub(crate) fn fwd_update_breaks_load_margin_from(
        &mut self,
        problem: &VehicleRoutingProblem,
        rank: usize,
    ) {
        let vehicle = problem.vehicle(self.raw.v_rank);
        let breaks = vehicle.breaks();

        let mut fwd_smallest = if self.breaks_counts[rank] == 0 {
            max_amount(problem.amount_size())
        } else {
            self.fwd_smallest_breaks_load_margin[self.breaks_counts[rank] - 1].clone()
        };

        for i in rank..=self.raw.route.len() {
            if self.breaks_at_rank[i] == 0 {
                continue;
            }
            let current_load = self.raw.load_at_step(i).clone();

            for break_rank in self.breaks_counts[i] - self.breaks_at_rank[i]..self.breaks_counts[i]
            {
                let b = &breaks[break_rank];
                debug_assert!(b.is_valid_for_load(&current_load));

                let current_margin = match b.max_load() {
                    Some(max_load) => max_load - &current_load,
                    None => max_amount(problem.amount_size()),
                };
                fwd_smallest.update_min(&current_margin);
                self.fwd_smallest_breaks_load_margin[break_rank] = fwd_smallest.clone();
            }
        }
    }

    pub(crate) fn bwd_update_breaks_load_margin_from(
        &mut self,
        problem: &VehicleRoutingProblem,
        rank: usize,
    ) {
        let vehicle = problem.vehicle(self.raw.v_rank);
        let breaks = vehicle.breaks();
        let total_breaks = *self.breaks_counts.last().expect("sentinel slot exists");

        let mut bwd_smallest = if self.breaks_counts[rank] == total_breaks {
            max_amount(problem.amount_size())
        } else {
            self.bwd_smallest_breaks_load_margin[self.breaks_counts[rank]].clone()
        };

        for i in (0..=rank).rev() {
            if self.breaks_at_rank[i] == 0 {
                continue;
            }
            let current_load = self.raw.load_at_step(i).clone();

            for offset in 0..self.breaks_at_rank[i] {
                let break_rank = self.breaks_counts[i] - 1 - offset;
                let b = &breaks[break_rank];
                debug_assert!(b.is_valid_for_load(&current_load));

                let current_margin = match b.max_load() {
                    Some(max_load) => max_load - &current_load,
                    None => max_amount(problem.amount_size()),
                };
                bwd_smallest.update_min(&current_margin);
                self.bwd_smallest_breaks_load_margin[break_rank] = bwd_smallest.clone();
            }
        }
    }

    /// Decides whether to sequence the job or the break first at the current
    /// point of a candidate walk.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn order_choice(
        &self,
        problem: &VehicleRoutingProblem,
        job_rank: JobRank,
        job_action_time: SignedDuration,
        b: &VehicleBreak,
        break_idx: usize,
        previous: &PreviousInfo,
        next: &NextInfo,
        current_load: &Amount,
        check_max_load: bool,
    ) -> OrderChoice {
        let job = problem.job(job_rank);
        let arrival = previous
            .earliest
            .saturating_add(previous.travel)
            .expect("duration math stays within hour-scale spans");

        let mut oc = OrderChoice {
            add_job_first: false,
            add_break_first: false,
            j_tw: job.time_windows().first_fitting(arrival).copied(),
            b_tw: b.time_windows().first_fitting(previous.earliest).copied(),
        };

        let (Some(j_tw), Some(b_tw)) = (oc.j_tw, oc.b_tw) else {
            // If either job or break cannot go first, no ordering works.
            return oc;
        };

        // Try job first, then break.
        let earliest_job_end = arrival
            .max(j_tw.start())
            .saturating_add(job_action_time)
            .expect("duration math stays within hour-scale spans");
        let mut job_then_break_margin = SignedDuration::ZERO;

        let Some(new_b_tw) = b.time_windows().first_fitting(earliest_job_end) else {
            // Break does not fit after the job; break-first is the only
            // option, load permitting.
            oc.add_break_first = !check_max_load || b.is_valid_for_load(current_load);
            return oc;
        };

        let mut travel_after_break = next.travel;
        let job_then_break_end;
        if earliest_job_end < new_b_tw.start() {
            job_then_break_margin = new_b_tw.start().duration_since(earliest_job_end);
            if job_then_break_margin < travel_after_break {
                travel_after_break -= job_then_break_margin;
            } else {
                travel_after_break = SignedDuration::ZERO;
            }

            job_then_break_end = b_tw
                .start()
                .saturating_add(b.service())
                .expect("duration math stays within hour-scale spans");
        } else {
            job_then_break_end = earliest_job_end
                .saturating_add(b.service())
                .expect("duration math stays within hour-scale spans");
        }

        if job_then_break_end
            .saturating_add(travel_after_break)
            .expect("duration math stays within hour-scale spans")
            > next.latest
        {
            // Starting the break is possible but the next step is not.
            oc.add_break_first = true;
            return oc;
        }

        if check_max_load && job.kind() == JobKind::Single {
            let mut load_after_job = current_load.clone();
            load_after_job += job.pickup();
            load_after_job -= job.delivery();

            if !b.is_valid_for_load(&load_after_job)
                || !is_capacity_satisfied(
                    &self.bwd_smallest_breaks_load_margin[break_idx],
                    job.pickup(),
                )
            {
                // Break does not fit right after the job for load reasons.
                oc.add_break_first = b.is_valid_for_load(current_load);
                return oc;
            }
        }

        // Try break first, then job.
        if check_max_load && !b.is_valid_for_load(current_load) {
            oc.add_job_first = true;
            return oc;
        }

        let mut travel_after_break = previous.travel;
        let mut earliest_job_start = previous.earliest;

        if previous.earliest < b_tw.start() {
            let margin = b_tw.start().duration_since(previous.earliest);
            if margin < travel_after_break {
                travel_after_break -= margin;
            } else {
                travel_after_break = SignedDuration::ZERO;
            }
            earliest_job_start = b_tw.start();
        }

        earliest_job_start = earliest_job_start
            .saturating_add(b.service()).expect("REASON")
            .saturating_add(travel_after_break).expect("REASON");

        let Some(new_j_tw) = job.time_windows().first_fitting(earliest_job_start) else {
            // Job does not fit after the break.
            oc.add_job_first = true;
            return oc;
        };
        let break_then_job_end = earliest_job_start
            .max(new_j_tw.start())
            .saturating_add(job_action_time)
            .expect("duration math stays within hour-scale spans");

        if break_then_job_end
            .saturating_add(next.travel)
            .expect("duration math stays within hour-scale spans")
            > next.latest
        {
            // Arrival at the job is valid but the next step is not.
            oc.add_job_first = true;
            return oc;
        }

        // Both orderings are feasible timing-wise.

        if job.kind() == JobKind::Pickup {
            // Favor pickup-first, but only if the matching delivery remains
            // feasible afterwards. Otherwise break -> pickup -> delivery may
            // be the only valid option.
            let matching_delivery = problem.job(job_rank + 1);
            debug_assert!(matching_delivery.is_delivery());

            // Try pickup -> break -> delivery.
            let mut delivery_travel = problem.duration(
                self.raw.v_rank,
                job.location_id(),
                matching_delivery.location_id(),
            );
            if job_then_break_margin < delivery_travel {
                delivery_travel -= job_then_break_margin;
            } else {
                delivery_travel = SignedDuration::ZERO;
            }
            let pickup_break_delivery_candidate =
                job_then_break_end.expect("REASON").saturating_add(delivery_travel);
            if matching_delivery
                .time_windows()
                .first_fitting(pickup_break_delivery_candidate.expect("REASON"))
                .is_some()
            {
                let mut load_with_pickup = current_load.clone();
                load_with_pickup += job.pickup();
                if !check_max_load || b.is_valid_for_load(&load_with_pickup) {
                    oc.add_job_first = true;
                    return oc;
                }
            }

            // Try pickup -> delivery -> break.
            let delivery_candidate = earliest_job_end.saturating_add(problem.duration(
                self.raw.v_rank,
                job.location_id(),
                matching_delivery.location_id(),
            ));
            if let Some(d_tw) = matching_delivery
                .time_windows()
                .first_fitting(delivery_candidate)
            {
                let delivery_action_time = matching_delivery
                    .action_time(self.raw.v_type, Some(job.location_id()));
                let break_candidate = delivery_candidate
                    .max(d_tw.start())
                    .saturating_add(delivery_action_time);

                if b.time_windows().first_fitting(break_candidate).is_some() {
                    oc.add_job_first = true;
                    return oc;
                }
            }

            // Pickup first leads to infeasible options.
            oc.add_break_first = true;
            return oc;
        }

        // Single job: pick the ordering minimizing the sequence's earliest
        // end date.
        if break_then_job_end < job_then_break_end {
            oc.add_break_first = true;
        } else if break_then_job_end == job_then_break_end {
            // Tie: decide by earliest deadline, except deliveries which must
            // not be postponed behind a zero-max-load break (waiting time
            // could grow without bound).
            if job.kind() == JobKind::Delivery || j_tw.end() <= b_tw.end() {
                oc.add_job_first = true;
            } else {
                oc.add_break_first = true;
            }
        } else {
            oc.add_job_first = true;
        }

        oc
    }

    /// Single-job insertion feasibility; delegates to the range form.
    pub fn is_valid_addition_for_tw(
        &self,
        problem: &VehicleRoutingProblem,
        job_rank: JobRank,
        rank: usize,
    ) -> bool {
        let job = problem.job(job_rank);
        let delivery = if job.is_single() {
            job.delivery().clone()
        } else {
            problem.zero_amount().clone()
        };
        let jobs = [job_rank];
        self.is_valid_range_addition_for_tw(problem, &delivery, jobs.iter().copied(), rank, rank, true)
    }

    /// Simulates replacing [first_rank; last_rank) with the given jobs plus
    /// the breaks currently assigned in that range.
    pub fn is_valid_range_addition_for_tw(
        &self,
        problem: &VehicleRoutingProblem,
        delivery: &Amount,
        jobs: impl ExactSizeIterator<Item = JobRank> + Clone,
        first_rank: usize,
        last_rank: usize,
        check_max_load: bool,
    ) -> bool {
        let n = self.raw.route.len();
        if first_rank > n || last_rank > n || first_rank > last_rank {
            return false;
        }
        debug_assert!(self.earliest.len() == n);
        debug_assert!(self.latest.len() == n);
        debug_assert!(self.action_time.len() == n);

        let vehicle = problem.vehicle(self.raw.v_rank);
        let soft_timing = problem.pinned_soft_timing();
        let zero_budget = problem.pinned_violation_budget().is_zero();

        // With a zero lateness budget, nothing may be prepended to a route
        // that already carries pinned work.
        if soft_timing && zero_budget && first_rank == 0 && !self.raw.route.is_empty() {
            let has_pinned = self
                .raw
                .route
                .iter()
                .any(|&job_rank| problem.job(job_rank).pinned());
            if has_pinned {
                return false;
            }
        }

        // Anchor, tag and first-leg gates on the post-edit sequence.
        if !self
            .raw
            .is_valid_range_addition_for_tw(problem, jobs.clone(), first_rank, last_rank)
        {
            return false;
        }

        let inserted: JobSequence = jobs.collect();
        let check_max_load = vehicle.has_break_max_load() && check_max_load;

        let mut current;
        let mut next;

        if let (Some(&first_job), Some(&last_job)) = (inserted.first(), inserted.last()) {
            current = self.previous_info(problem, first_job, first_rank);
            next = self.next_info(problem, last_job, last_rank);
        } else {
            // Pure removal.
            current = PreviousInfo::new(self.v_start);
            next = NextInfo {
                latest: self.v_end,
                travel: SignedDuration::ZERO,
            };

            if first_rank > 0 {
                let previous_job = problem.job(self.raw.route[first_rank - 1]);
                current.earliest =
                    self.earliest[first_rank - 1].saturating_add(self.action_time[first_rank - 1]).expect("REASON");
                current.location = Some(previous_job.location_id());

                if last_rank < n {
                    next.latest = self.latest[last_rank];
                    next.travel = problem.duration(
                        self.raw.v_rank,
                        previous_job.location_id(),
                        problem.job(self.raw.route[last_rank]).location_id(),
                    );
                } else if let Some(end) = vehicle.end_location() {
                    next.travel =
                        problem.duration(self.raw.v_rank, previous_job.location_id(), end);
                }
            } else if last_rank < n {
                next.latest = self.latest[last_rank];
                if let Some(start) = vehicle.start_location() {
                    current.location = Some(start);
                    next.travel = problem.duration(
                        self.raw.v_rank,
                        start,
                        problem.job(self.raw.route[last_rank]).location_id(),
                    );
                }
            } else {
                // Emptying the whole route is always valid.
                return true;
            }
        }

        // With a zero lateness budget, also refuse inserting right before a
        // pinned step.
        if soft_timing
            && zero_budget
            && last_rank < n
            && problem.job(self.raw.route[last_rank]).pinned()
        {
            return false;
        }

        // Breaks assigned within the replaced range.
        debug_assert!(self.breaks_at_rank.len() == n + 1);
        debug_assert!(self.breaks_counts.len() == n + 1);
        let max_breaks = vehicle.breaks().len();
        let mut current_break = self.breaks_counts[first_rank] - self.breaks_at_rank[first_rank];
        let mut last_break = self.breaks_counts[last_rank];
        if last_break > max_breaks {
            last_break = max_breaks;
        }
        if current_break > last_break {
            current_break = last_break;
        }

        let mut current_load = problem.zero_amount().clone();
        if check_max_load {
            let previous_init_load = if self.raw.route.is_empty() {
                problem.zero_amount().clone()
            } else {
                self.raw.load_at_step(first_rank).clone()
            };
            let mut delta_delivery = delivery.clone();
            delta_delivery -= &self.raw.delivery_in_range(first_rank, last_rank);

            if current_break != 0
                && !is_capacity_satisfied(
                    &self.fwd_smallest_breaks_load_margin[current_break - 1],
                    &delta_delivery,
                )
            {
                return false;
            }

            current_load = previous_init_load;
            current_load += &delta_delivery;
        }

        // Walk jobs and breaks, deciding their relative order on the fly.
        let breaks = vehicle.breaks();
        let mut job_idx = 0;

        while job_idx < inserted.len() || current_break < last_break {
            if job_idx == inserted.len() {
                // Only breaks left.
                let b = &breaks[current_break];

                let Some(b_tw) = b.time_windows().first_fitting(current.earliest) else {
                    return false;
                };
                if check_max_load && !b.is_valid_for_load(&current_load) {
                    return false;
                }

                if current.earliest < b_tw.start() {
                    let margin = b_tw.start().duration_since(current.earliest);
                    if margin < next.travel {
                        next.travel -= margin;
                    } else {
                        next.travel = SignedDuration::ZERO;
                    }
                    current.earliest = b_tw.start();
                }

                current.earliest = current.earliest.saturating_add(b.service()).expect("REASON");
                current_break += 1;
                continue;
            }

            let job = problem.job(inserted[job_idx]);

            if current_break == last_break {
                // Only jobs left.
                current.earliest = current.earliest.saturating_add(current.travel).expect("REASON");

                let Some(j_tw) = job.time_windows().first_fitting(current.earliest) else {
                    return false;
                };
                let job_action_time = job.action_time(self.raw.v_type, current.location);
                current.location = Some(job.location_id());
                // Soft timing may have drifted past the window start; keep the
                // clamped service start.
                let job_start = current.earliest.max(j_tw.start());
                current.earliest = job_start.saturating_add(job_action_time).expect("REASON");

                if check_max_load {
                    debug_assert!(is_capacity_satisfied(&current_load, job.delivery()));
                    current_load += job.pickup();
                    current_load -= job.delivery();
                }

                job_idx += 1;
                if job_idx < inserted.len() {
                    current.travel = problem.duration(
                        self.raw.v_rank,
                        job.location_id(),
                        problem.job(inserted[job_idx]).location_id(),
                    );
                }
                continue;
            }

            // Both a job and a break are pending: choose an order.
            let b = &breaks[current_break];
            let job_action_time = job.action_time(self.raw.v_type, current.location);

            let oc = self.order_choice(
                problem,
                inserted[job_idx],
                job_action_time,
                b,
                current_break,
                &current,
                &next,
                &current_load,
                check_max_load,
            );

            if !oc.add_job_first && !oc.add_break_first {
                return false;
            }
            debug_assert!(oc.add_job_first != oc.add_break_first);

            if oc.add_break_first {
                if check_max_load && !b.is_valid_for_load(&current_load) {
                    return false;
                }
                let Some(b_tw) = oc.b_tw else {
                    return false;
                };

                if current.earliest < b_tw.start() {
                    let margin = b_tw.start().duration_since(current.earliest);
                    if margin < current.travel {
                        current.travel -= margin;
                    } else {
                        current.travel = SignedDuration::ZERO;
                    }
                    current.earliest = b_tw.start();
                }

                current.earliest = current.earliest.saturating_add(b.service()).expect("REASON");
                current_break += 1;
            }
            if oc.add_job_first {
                let Some(j_tw) = oc.j_tw else {
                    return false;
                };
                current.location = Some(job.location_id());

                let job_start = current
                    .earliest
                    .saturating_add(current.travel)
                    .max(j_tw.start());
                current.earliest = job_start.saturating_add(job_action_time);

                if check_max_load {
                    debug_assert!(is_capacity_satisfied(&current_load, job.delivery()));
                    current_load += job.pickup();
                    current_load -= job.delivery();
                }

                job_idx += 1;
                if job_idx < inserted.len() {
                    current.travel = problem.duration(
                        self.raw.v_rank,
                        job.location_id(),
                        problem.job(inserted[job_idx]).location_id(),
                    );
                }
            }
        }

        if check_max_load && last_break < breaks.len() {
            let previous_final_load = if self.raw.route.is_empty() {
                problem.zero_amount().clone()
            } else {
                self.raw.load_at_step(last_rank).clone()
            };
            let delta_pickup = &current_load - &previous_final_load;

            if !is_capacity_satisfied(
                &self.bwd_smallest_breaks_load_margin[last_break],
                &delta_pickup,
            ) {
                return false;
            }
        }

        if last_rank < n
            && Some(problem.job(self.raw.route[last_rank]).location_id()) != current.location
        {
            // Setup time applies to the first retained job again. If its
            // action time grows, shifting its earliest date may break the
            // following step even when the margin check below passes.
            let job_after = problem.job(self.raw.route[last_rank]);
            let new_action_time = job_after.action_time(self.raw.v_type, None);

            if self.action_time[last_rank] < new_action_time {
                let mut earliest_after = current.earliest.saturating_add(next.travel);
                let Some(j_after_tw) = job_after.time_windows().first_fitting(earliest_after.expect("REASON"))
                else {
                    return false;
                };
                earliest_after = earliest_after.max(j_after_tw.start());

                let mut next_after = self.next_info(problem, self.raw.route[last_rank], last_rank + 1);
                let mut action_after = new_action_time;

                let mut break_rank =
                    self.breaks_counts[last_rank + 1] - self.breaks_at_rank[last_rank + 1];
                for _ in 0..self.breaks_at_rank[last_rank + 1] {
                    let b = &breaks[break_rank];
                    earliest_after = earliest_after.expect("REASON").saturating_add(action_after);

                    let Some(b_tw) = b.time_windows().first_fitting(earliest_after.expect("REASON")) else {
                        return false;
                    };

                    if earliest_after < b_tw.start() {
                        let margin = b_tw.start().duration_since(earliest_after.expect("REASON"));
                        if margin < next_after.travel {
                            next_after.travel -= margin;
                        } else {
                            next_after.travel = SignedDuration::ZERO;
                        }
                        earliest_after = b_tw.start();
                    }

                    action_after = b.service();
                    break_rank += 1;
                }

                if earliest_after.expect("REASON")
                    .saturating_add(action_after).expect("REASON")
                    .saturating_add(next_after.travel)
                    > next_after.latest
                {
                    return false;
                }
            }
        }

        let tw_ok = current.earliest.saturating_add(next.travel) <= next.latest;

        if !tw_ok && !soft_timing {
            return false;
        }

        if soft_timing && last_rank < n && !self.baseline_service_start.is_empty() {
            // Added delay at the first retained step, measured from the
            // seeded baseline.
            let arrival_with_insertion = current.earliest.saturating_add(next.travel);
            let baseline = self
                .baseline_service_start
                .get(last_rank)
                .or(self.baseline_service_start.last())
                .copied()
                .expect("baseline is not empty");
            let delta = if arrival_with_insertion > baseline {
                arrival_with_insertion.expect("REASON").duration_since(baseline)
            } else {
                SignedDuration::ZERO
            };

            // Allowed added delay is bounded by every pinned step at or after
            // last_rank.
            let mut allowed: Option<SignedDuration> = None;
            for k in last_rank..n {
                let job = problem.job(self.raw.route[k]);
                if !job.pinned() {
                    continue;
                }
                let base_k = self
                    .baseline_service_start
                    .get(k)
                    .copied()
                    .unwrap_or(baseline);
                let step_allowed = match job.time_windows().first_fitting(base_k) {
                    Some(tw) => tw
                        .end()
                        .duration_since(base_k)
                        .min(problem.pinned_violation_budget()),
                    // Already past the last window at baseline: no slack.
                    None => SignedDuration::ZERO,
                };
                allowed = Some(match allowed {
                    Some(current_allowed) => current_allowed.min(step_allowed),
                    None => step_allowed,
                });
            }

            match allowed {
                // No pinned steps ahead, no extra guard.
                None => return tw_ok,
                Some(allowed) => {
                    if delta > allowed {
                        return false;
                    }
                }
            }
        }

        tw_ok
    }

    pub fn add(&mut self, problem: &VehicleRoutingProblem, job_rank: JobRank, rank: usize) {
        let job = problem.job(job_rank);
        let delivery = if job.is_single() {
            job.delivery().clone()
        } else {
            problem.zero_amount().clone()
        };
        let jobs = [job_rank];
        self.replace(problem, &delivery, jobs.iter().copied(), rank, rank);
    }

    pub fn remove(&mut self, problem: &VehicleRoutingProblem, rank: usize, count: usize) {
        let zero = problem.zero_amount().clone();
        self.replace(problem, &zero, std::iter::empty(), rank, rank + count);
    }

    /// Commits a previously validated edit, rebuilding the schedule for the
    /// inserted range and re-propagating from the boundary ranks.
    pub fn replace(
        &mut self,
        problem: &VehicleRoutingProblem,
        delivery: &Amount,
        jobs: impl ExactSizeIterator<Item = JobRank>,
        first_rank: usize,
        last_rank: usize,
    ) {
        debug_assert!(first_rank <= last_rank);
        debug_assert!(last_rank <= self.raw.route.len());

        let vehicle = problem.vehicle(self.raw.v_rank);
        let breaks = vehicle.breaks();
        let inserted: JobSequence = jobs.collect();

        let mut current;
        let mut next;

        if let (Some(&first_job), Some(&last_job)) = (inserted.first(), inserted.last()) {
            current = self.previous_info(problem, first_job, first_rank);
            next = self.next_info(problem, last_job, last_rank);
        } else {
            current = PreviousInfo::new(self.v_start);
            next = NextInfo {
                latest: self.v_end,
                travel: SignedDuration::ZERO,
            };

            if first_rank > 0 {
                let previous_job = problem.job(self.raw.route[first_rank - 1]);
                current.earliest =
                    self.earliest[first_rank - 1].saturating_add(self.action_time[first_rank - 1]).expect("REASON");
                current.location = Some(previous_job.location_id());

                if last_rank < self.raw.route.len() {
                    next.latest = self.latest[last_rank];
                    next.travel = problem.duration(
                        self.raw.v_rank,
                        previous_job.location_id(),
                        problem.job(self.raw.route[last_rank]).location_id(),
                    );
                } else if let Some(end) = vehicle.end_location() {
                    next.travel =
                        problem.duration(self.raw.v_rank, previous_job.location_id(), end);
                }
            } else if last_rank < self.raw.route.len() {
                next.latest = self.latest[last_rank];
                if let Some(start) = vehicle.start_location() {
                    current.location = Some(start);
                    next.travel = problem.duration(
                        self.raw.v_rank,
                        start,
                        problem.job(self.raw.route[last_rank]).location_id(),
                    );
                }
            }
        }

        let mut current_break = self.breaks_counts[first_rank] - self.breaks_at_rank[first_rank];
        let last_break = self.breaks_counts[last_rank].min(breaks.len());

        // Initial load inside the range, lowered by the removed deliveries.
        let previous_init_load = if self.raw.route.is_empty() {
            problem.zero_amount().clone()
        } else {
            self.raw.load_at_step(first_rank).clone()
        };
        let previous_final_load = if self.raw.route.is_empty() {
            problem.zero_amount().clone()
        } else {
            self.raw.load_at_step(last_rank).clone()
        };
        let mut delta_delivery = delivery.clone();
        delta_delivery -= &self.raw.delivery_in_range(first_rank, last_rank);
        let mut current_load = previous_init_load;
        current_load += &delta_delivery;

        // Shift break load margins before the modified range. Amount ops
        // saturate, which matches the intended clamp at the maximum.
        debug_assert!(
            current_break == 0
                || is_capacity_satisfied(
                    &self.fwd_smallest_breaks_load_margin[current_break - 1],
                    &delta_delivery
                )
        );
        for margin in self.fwd_smallest_breaks_load_margin[..current_break].iter_mut() {
            *margin -= &delta_delivery;
        }

        let mut previous_breaks_counts = if first_rank > 0 {
            self.breaks_counts[first_rank - 1]
        } else {
            0
        };

        // Resize the per-rank vectors. Old values inside the overlap are
        // overwritten with sentinels so boundary propagation cannot stop
        // early on stale-but-equal dates.
        let erase_count = last_rank - first_rank;
        let add_count = inserted.len();

        if add_count < erase_count {
            let to_erase = erase_count - add_count;
            self.raw.route.drain(first_rank..first_rank + to_erase);
            self.earliest.drain(first_rank..first_rank + to_erase);
            self.latest.drain(first_rank..first_rank + to_erase);
            self.action_time.drain(first_rank..first_rank + to_erase);
            self.breaks_at_rank.drain(first_rank..first_rank + to_erase);
            self.breaks_counts.drain(first_rank..first_rank + to_erase);

            self.earliest[first_rank..first_rank + add_count].fill(Timestamp::MAX);
            self.latest[first_rank..first_rank + add_count].fill(Timestamp::MIN);
        } else {
            self.earliest[first_rank..first_rank + erase_count].fill(Timestamp::MAX);
            self.latest[first_rank..first_rank + erase_count].fill(Timestamp::MIN);

            let to_insert = add_count - erase_count;
            splice_default(&mut self.raw.route, first_rank, to_insert, 0);
            splice_default(&mut self.earliest, first_rank, to_insert, Timestamp::MIN);
            splice_default(&mut self.latest, first_rank, to_insert, Timestamp::MIN);
            splice_default(
                &mut self.action_time,
                first_rank,
                to_insert,
                SignedDuration::ZERO,
            );
            splice_default(&mut self.breaks_at_rank, first_rank, to_insert, 0);
            splice_default(&mut self.breaks_counts, first_rank, to_insert, 0);
        }

        // The breaks vectors always carry the trailing sentinel slot.
        let expected_slots = self.raw.route.len() + 1;
        if self.breaks_at_rank.len() != expected_slots {
            self.breaks_at_rank.resize(expected_slots, 0);
        }
        if self.breaks_counts.len() != expected_slots {
            self.breaks_counts.resize(expected_slots, 0);
        }

        let mut current_job_rank = first_rank;
        let mut breaks_before = 0;
        let mut job_idx = 0;

        while job_idx < inserted.len() || current_break < last_break {
            if job_idx == inserted.len() {
                if current_break >= breaks.len() {
                    current_break = last_break;
                    continue;
                }
                let b = &breaks[current_break];
                debug_assert!(b.is_valid_for_load(&current_load));

                let b_tw = match b.time_windows().first_fitting(current.earliest) {
                    Some(b_tw) => *b_tw,
                    None => *b.time_windows().back(),
                };

                if current.earliest < b_tw.start() {
                    let margin = b_tw.start().duration_since(current.earliest);
                    if margin < next.travel {
                        next.travel -= margin;
                    } else {
                        next.travel = SignedDuration::ZERO;
                    }
                    current.earliest = b_tw.start();
                }
                self.break_earliest[current_break] = current.earliest;
                current.earliest = current.earliest.saturating_add(b.service()).expect("REASON");

                self.write_fwd_break_margin(problem, current_break, &current_load, breaks);

                breaks_before += 1;
                current_break += 1;
                continue;
            }

            let job = problem.job(inserted[job_idx]);

            if current_break == last_break {
                current.earliest = current.earliest.saturating_add(current.travel).expect("REASON");

                let j_tw = match job.time_windows().first_fitting(current.earliest) {
                    Some(j_tw) => *j_tw,
                    None => *job.time_windows().back(),
                };
                current.earliest = current.earliest.max(j_tw.start());

                self.raw.route[current_job_rank] = inserted[job_idx];
                self.earliest[current_job_rank] = current.earliest;
                self.breaks_at_rank[current_job_rank] = breaks_before;
                self.breaks_counts[current_job_rank] = previous_breaks_counts + breaks_before;

                self.action_time[current_job_rank] =
                    job.action_time(self.raw.v_type, current.location);
                current.location = Some(job.location_id());
                current.earliest = current
                    .earliest
                    .saturating_add(self.action_time[current_job_rank]).expect("REASON");

                previous_breaks_counts += breaks_before;
                breaks_before = 0;
                current_job_rank += 1;

                debug_assert!(is_capacity_satisfied(&current_load, job.delivery()));
                current_load += job.pickup();
                current_load -= job.delivery();

                job_idx += 1;
                if job_idx < inserted.len() {
                    current.travel = problem.duration(
                        self.raw.v_rank,
                        job.location_id(),
                        problem.job(inserted[job_idx]).location_id(),
                    );
                }
                continue;
            }

            if current_break >= breaks.len() {
                current_break = last_break;
                continue;
            }
            let b = &breaks[current_break];
            let job_action_time = job.action_time(self.raw.v_type, current.location);

            let oc = self.order_choice(
                problem,
                inserted[job_idx],
                job_action_time,
                b,
                current_break,
                &current,
                &next,
                &current_load,
                true,
            );
            debug_assert!(oc.add_job_first != oc.add_break_first);

            if oc.add_break_first {
                debug_assert!(b.is_valid_for_load(&current_load));
                let b_tw = oc.b_tw.unwrap_or(*b.time_windows().back());

                if current.earliest < b_tw.start() {
                    let margin = b_tw.start().duration_since(current.earliest);
                    if margin < current.travel {
                        current.travel -= margin;
                    } else {
                        current.travel = SignedDuration::ZERO;
                    }
                    current.earliest = b_tw.start();
                }
                self.break_earliest[current_break] = current.earliest;
                current.earliest = current.earliest.saturating_add(b.service()).expect("REASON");

                self.write_fwd_break_margin(problem, current_break, &current_load, breaks);

                breaks_before += 1;
                current_break += 1;
            }
            if oc.add_job_first {
                let j_tw = oc.j_tw.unwrap_or(*job.time_windows().back());
                current.earliest = current
                    .earliest
                    .saturating_add(current.travel)
                    .max(j_tw.start());

                self.raw.route[current_job_rank] = inserted[job_idx];
                self.earliest[current_job_rank] = current.earliest;
                self.breaks_at_rank[current_job_rank] = breaks_before;
                self.breaks_counts[current_job_rank] = previous_breaks_counts + breaks_before;

                self.action_time[current_job_rank] = job_action_time;
                current.earliest = current.earliest.saturating_add(job_action_time).expect("REASON");
                current.location = Some(job.location_id());

                previous_breaks_counts += breaks_before;
                breaks_before = 0;
                current_job_rank += 1;

                debug_assert!(is_capacity_satisfied(&current_load, job.delivery()));
                current_load += job.pickup();
                current_load -= job.delivery();

                job_idx += 1;
                if job_idx < inserted.len() {
                    current.travel = problem.duration(
                        self.raw.v_rank,
                        job.location_id(),
                        problem.job(inserted[job_idx]).location_id(),
                    );
                }
            }
        }

        debug_assert!(current_job_rank == first_rank + add_count);

        // Shift break load margins after the modified range.
        let delta_pickup = &current_load - &previous_final_load;
        for margin in self.bwd_smallest_breaks_load_margin[last_break..].iter_mut() {
            debug_assert!(is_capacity_satisfied(margin, &delta_pickup));
            *margin -= &delta_pickup;
        }

        // Breaks still due before the next retained step.
        self.breaks_at_rank[current_job_rank] = breaks_before;
        self.breaks_counts[current_job_rank] = previous_breaks_counts + breaks_before;

        if !self.raw.route.is_empty() {
            let n = self.raw.route.len();
            let mut valid_latest_date_rank = current_job_rank;
            let mut valid_earliest_date_rank = first_rank.saturating_sub(1);
            let replace_last_jobs = current_job_rank == n;
            let mut do_update_last_latest_date = false;

            if replace_last_jobs {
                self.earliest_end = current.earliest.saturating_add(next.travel).expect("REASON");
                do_update_last_latest_date = true;
                valid_latest_date_rank = n - 1;
            } else {
                // current_job_rank is the first non-replaced job.
                let job = problem.job(self.raw.route[current_job_rank]);
                let new_action_time = job.action_time(self.raw.v_type, current.location);

                let current_action_time_changed =
                    new_action_time != self.action_time[current_job_rank];
                if current_action_time_changed {
                    // Time spent at the first retained job changed: its
                    // latest date must be refreshed, directly when it closes
                    // the route, through backward propagation otherwise.
                    if current_job_rank == n - 1 {
                        do_update_last_latest_date = true;
                    } else {
                        valid_latest_date_rank = current_job_rank + 1;
                        // Defeat the backward propagation stop criterion.
                        self.latest[current_job_rank] = Timestamp::MIN;
                    }
                }

                if current_job_rank == 0 {
                    // Head of route erased without replacement: refresh the
                    // new first job directly.
                    current.earliest = current.earliest.saturating_add(next.travel).expect("REASON");
                    let earliest = match job.time_windows().first_fitting(current.earliest) {
                        Some(j_tw) => current.earliest.max(j_tw.start()),
                        None => job.time_windows().back().end(),
                    };
                    self.earliest[0] = earliest;
                    self.action_time[0] = new_action_time;
                } else {
                    valid_earliest_date_rank =
                        valid_earliest_date_rank.min(current_job_rank - 1);
                }
            }

            if !replace_last_jobs {
                // Force recomputation of earliest dates for the suffix that
                // depends on the modified prefix; a neutral sentinel keeps
                // forward propagation from stopping early on stale values.
                // Latest dates of retained ranks only depend on what follows
                // them and stay valid.
                let reset_from = (valid_earliest_date_rank + 1).min(n);
                if reset_from < n {
                    for i in reset_from..n {
                        self.earliest[i] = self.v_end;
                    }
                    self.fwd_update_action_time_from(problem, valid_earliest_date_rank);
                    self.fwd_update_earliest_from(problem, valid_earliest_date_rank);
                }
            }

            if do_update_last_latest_date {
                self.update_last_latest_date(problem);
            }
            let valid_latest_date_rank = valid_latest_date_rank.min(n - 1);
            self.bwd_update_latest_from(problem, valid_latest_date_rank);
        }

        self.raw.update_amounts(problem);

        if last_break < breaks.len() {
            self.fwd_update_breaks_load_margin_from(problem, current_job_rank);
        }
        if last_break > 0 {
            self.bwd_update_breaks_load_margin_from(problem, current_job_rank);
        }
    }

    fn write_fwd_break_margin(
        &mut self,
        problem: &VehicleRoutingProblem,
        break_rank: usize,
        current_load: &Amount,
        breaks: &[VehicleBreak],
    ) {
        let current_margin = match breaks[break_rank].max_load() {
            Some(max_load) => max_load - current_load,
            None => max_amount(problem.amount_size()),
        };
        if break_rank == 0 {
            self.fwd_smallest_breaks_load_margin[0] = current_margin;
        } else {
            let mut margin = self.fwd_smallest_breaks_load_margin[break_rank - 1].clone();
            margin.update_min(&current_margin);
            self.fwd_smallest_breaks_load_margin[break_rank] = margin;
        }
    }
}

fn splice_default<T: Clone>(vec: &mut Vec<T>, at: usize, count: usize, value: T) {
    vec.splice(at..at, std::iter::repeat_n(value, count));
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::problem::amount::Amount;
    use crate::test_utils::ProblemFixture;

    fn ts(iso: &str) -> Timestamp {
        iso.parse().unwrap()
    }

    fn shift() -> TimeWindow {
        TimeWindow::from_iso(
            Some("2025-06-10T08:00:00Z"),
            Some("2025-06-10T18:00:00Z"),
        )
    }

    #[test]
    fn test_replace_builds_schedule() {
        // Travel is 600s between distinct locations, services are zero.
        let problem = ProblemFixture::new(3)
            .travel_secs(600)
            .job(|_| {})
            .job(|_| {})
            .vehicle(|v| {
                v.set_time_window(shift());
            })
            .build();

        let mut route = TwRoute::new(&problem, 0).unwrap();
        let jobs = [0usize, 1];
        route.replace(&problem, problem.zero_amount(), jobs.iter().copied(), 0, 0);

        assert_eq!(route.route, vec![0, 1]);
        assert_eq!(route.earliest[0], ts("2025-06-10T08:10:00Z"));
        assert_eq!(route.earliest[1], ts("2025-06-10T08:20:00Z"));
        assert_eq!(route.latest[1], ts("2025-06-10T17:50:00Z"));
        assert_eq!(route.latest[0], ts("2025-06-10T17:40:00Z"));
        assert_eq!(route.earliest_end, ts("2025-06-10T08:30:00Z"));

        for i in 0..route.route.len() {
            assert!(route.earliest[i] <= route.latest[i]);
        }
    }

    #[test]
    fn test_tw_insertion_feasibility() {
        let problem = ProblemFixture::new(4)
            .travel_secs(600)
            .job(|_| {})
            .job(|_| {})
            .job(|j| {
                j.set_time_window(TimeWindow::from_iso(
                    Some("2025-06-10T08:00:00Z"),
                    Some("2025-06-10T08:15:00Z"),
                ));
            })
            .vehicle(|v| {
                v.set_time_window(shift());
            })
            .build();

        let mut route = TwRoute::new(&problem, 0).unwrap();
        let jobs = [0usize, 1];
        route.replace(&problem, problem.zero_amount(), jobs.iter().copied(), 0, 0);

        // job_2 can only be reached in time as the first stop.
        assert!(route.is_valid_addition_for_tw(&problem, 2, 0));
        assert!(!route.is_valid_addition_for_tw(&problem, 2, 1));
        assert!(!route.is_valid_addition_for_tw(&problem, 2, 2));
    }

    #[test]
    fn test_break_is_scheduled_against_job() {
        let problem = ProblemFixture::new(2)
            .travel_secs(600)
            .job(|_| {})
            .vehicle(|v| {
                v.set_time_window(shift());
                v.add_break(crate::problem::vehicle::VehicleBreak::new(
                    "break_0",
                    vec![TimeWindow::from_iso(
                        Some("2025-06-10T09:00:00Z"),
                        Some("2025-06-10T09:30:00Z"),
                    )],
                    SignedDuration::from_secs(300),
                    None,
                ));
            })
            .build();

        let route = TwRoute::new(&problem, 0).unwrap();
        assert_eq!(route.break_earliest[0], ts("2025-06-10T09:00:00Z"));
        assert_eq!(route.break_latest[0], ts("2025-06-10T09:30:00Z"));

        let mut route = route;
        let jobs = [0usize];
        route.replace(&problem, problem.zero_amount(), jobs.iter().copied(), 0, 0);

        // Tied end dates: the job deadline is looser than the break's, so
        // the break goes first.
        assert_eq!(route.breaks_at_rank[0], 1);
        assert_eq!(route.breaks_at_rank[1], 0);
        assert_eq!(route.break_earliest[0], ts("2025-06-10T09:00:00Z"));
        assert_eq!(route.earliest[0], ts("2025-06-10T09:05:00Z"));
        assert_eq!(route.earliest_end, ts("2025-06-10T09:15:00Z"));
        assert_eq!(route.latest[0], ts("2025-06-10T17:50:00Z"));
    }

    #[test]
    fn test_unconstrained_breaks_error_free() {
        let problem = ProblemFixture::new(2)
            .job(|_| {})
            .vehicle(|v| {
                v.add_break(crate::problem::vehicle::VehicleBreak::new(
                    "break_0",
                    vec![],
                    SignedDuration::from_secs(300),
                    None,
                ));
            })
            .build();

        assert!(TwRoute::new(&problem, 0).is_ok());
    }

    #[test]
    fn test_impossible_break_errors() {
        let problem = ProblemFixture::new(2)
            .job(|_| {})
            .vehicle(|v| {
                v.set_time_window(shift());
                // Break window closed before the shift starts.
                v.add_break(crate::problem::vehicle::VehicleBreak::new(
                    "break_0",
                    vec![TimeWindow::from_iso(
                        Some("2025-06-10T06:00:00Z"),
                        Some("2025-06-10T07:00:00Z"),
                    )],
                    SignedDuration::from_secs(300),
                    None,
                ));
            })
            .build();

        assert!(TwRoute::new(&problem, 0).is_err());
    }

    #[test]
    fn test_zero_max_load_break_goes_after_delivery() {
        let problem = ProblemFixture::new(3)
            .travel_secs(600)
            .job(|j| {
                j.set_delivery(Amount::from_vec(vec![5]));
            })
            .job(|j| {
                j.set_pickup(Amount::from_vec(vec![5]));
            })
            .vehicle(|v| {
                v.set_time_window(shift());
                v.set_capacity(Amount::from_vec(vec![10]));
                v.add_break(crate::problem::vehicle::VehicleBreak::new(
                    "break_0",
                    vec![],
                    SignedDuration::from_secs(300),
                    Some(Amount::from_vec(vec![0])),
                ));
            })
            .build();

        // Delivery job: the vehicle leaves loaded, so the break must wait
        // until after the drop.
        let mut route = TwRoute::new(&problem, 0).unwrap();
        assert!(route.is_valid_addition_for_tw(&problem, 0, 0));
        route.add(&problem, 0, 0);
        assert_eq!(route.breaks_at_rank[0], 0);
        assert_eq!(route.breaks_at_rank[1], 1);

        // Pickup job: the vehicle returns loaded, so the break goes first.
        let mut route = TwRoute::new(&problem, 0).unwrap();
        assert!(route.is_valid_addition_for_tw(&problem, 1, 0));
        route.add(&problem, 1, 0);
        assert_eq!(route.breaks_at_rank[0], 1);
        assert_eq!(route.breaks_at_rank[1], 0);
    }

    #[test]
    fn test_seed_relaxed_ignores_time_windows() {
        let problem = ProblemFixture::new(3)
            .travel_secs(600)
            .job(|j| {
                j.set_pinned(true);
                j.set_time_window(TimeWindow::from_iso(
                    Some("2025-06-10T06:00:00Z"),
                    Some("2025-06-10T06:30:00Z"),
                ));
            })
            .job(|_| {})
            .vehicle(|v| {
                v.set_time_window(shift());
                v.set_steps(vec!["job_0".into()]);
                v.add_break(crate::problem::vehicle::VehicleBreak::new(
                    "break_0",
                    vec![],
                    SignedDuration::from_secs(300),
                    None,
                ));
            })
            .build();

        let mut route = TwRoute::new(&problem, 0).unwrap();
        route.seed_relaxed_from_job_ranks(&problem, vec![0, 1]);

        // Earliest dates are plain travel sums, even past the job's window.
        assert_eq!(route.earliest[0], ts("2025-06-10T08:10:00Z"));
        assert_eq!(route.earliest[1], ts("2025-06-10T08:20:00Z"));
        assert_eq!(route.baseline_service_start[0], ts("2025-06-10T08:10:00Z"));
        assert!(route.is_pinned_step[0]);
        assert!(!route.is_pinned_step[1]);

        // All breaks parked in the trailing sentinel slot.
        assert_eq!(route.breaks_at_rank, vec![0, 0, 1]);
        assert_eq!(route.breaks_counts, vec![0, 0, 1]);
    }

    #[test]
    fn test_soft_pin_zero_budget_blocks_insertions_near_pinned() {
        let problem = ProblemFixture::new(3)
            .travel_secs(600)
            .soft_timing(SignedDuration::ZERO)
            .job(|j| {
                j.set_pinned(true);
            })
            .job(|_| {})
            .vehicle(|v| {
                v.set_time_window(shift());
                v.set_steps(vec!["job_0".into()]);
            })
            .build();

        let mut route = TwRoute::new(&problem, 0).unwrap();
        route.seed_relaxed_from_job_ranks(&problem, vec![0]);

        // No prepend at all while the route holds pinned work, and no
        // insertion right before the pinned step.
        let jobs = [1usize];
        assert!(!route.is_valid_range_addition_for_tw(
            &problem,
            problem.zero_amount(),
            jobs.iter().copied(),
            0,
            0,
            true,
        ));
        // After the pinned step is fine.
        assert!(route.is_valid_range_addition_for_tw(
            &problem,
            problem.zero_amount(),
            jobs.iter().copied(),
            1,
            1,
            true,
        ));
    }

    #[test]
    fn test_soft_pin_budget_bounds_added_delay() {
        // 0 -> loc2 takes 600s, loc2 -> loc1 takes 5s: the detour through
        // job_1 delays the pinned job by exactly 5 seconds.
        let problem = ProblemFixture::new(3)
            .durations(vec![
                vec![0, 600, 600],
                vec![600, 0, 5],
                vec![600, 5, 0],
            ])
            .soft_timing(SignedDuration::from_secs(5))
            .job(|j| {
                j.set_pinned(true);
                j.set_time_window(TimeWindow::from_iso(
                    Some("2025-06-10T08:00:00Z"),
                    Some("2025-06-10T08:30:00Z"),
                ));
            })
            .job(|_| {})
            .vehicle(|v| {
                v.set_time_window(shift());
                v.set_steps(vec!["job_0".into()]);
            })
            .build();

        let mut route = TwRoute::new(&problem, 0).unwrap();
        route.seed_relaxed_from_job_ranks(&problem, vec![0]);

        let jobs = [1usize];
        assert!(route.is_valid_range_addition_for_tw(
            &problem,
            problem.zero_amount(),
            jobs.iter().copied(),
            0,
            0,
            true,
        ));

        // With a tighter budget the same detour is rejected.
        let problem = ProblemFixture::new(3)
            .durations(vec![
                vec![0, 600, 600],
                vec![600, 0, 5],
                vec![600, 5, 0],
            ])
            .soft_timing(SignedDuration::from_secs(4))
            .job(|j| {
                j.set_pinned(true);
                j.set_time_window(TimeWindow::from_iso(
                    Some("2025-06-10T08:00:00Z"),
                    Some("2025-06-10T08:30:00Z"),
                ));
            })
            .job(|_| {})
            .vehicle(|v| {
                v.set_time_window(shift());
                v.set_steps(vec!["job_0".into()]);
            })
            .build();

        let mut route = TwRoute::new(&problem, 0).unwrap();
        route.seed_relaxed_from_job_ranks(&problem, vec![0]);

        assert!(!route.is_valid_range_addition_for_tw(
            &problem,
            problem.zero_amount(),
            jobs.iter().copied(),
            0,
            0,
            true,
        ));
    }

    #[test]
    fn test_add_remove_round_trip_restores_schedule() {
        let problem = ProblemFixture::new(4)
            .travel_secs(600)
            .job(|_| {})
            .job(|_| {})
            .job(|_| {})
            .vehicle(|v| {
                v.set_time_window(shift());
            })
            .build();

        let mut route = TwRoute::new(&problem, 0).unwrap();
        let jobs = [0usize, 1];
        route.replace(&problem, problem.zero_amount(), jobs.iter().copied(), 0, 0);

        let earliest = route.earliest.clone();
        let latest = route.latest.clone();
        let action_time = route.action_time.clone();

        route.add(&problem, 2, 1);
        route.remove(&problem, 1, 1);

        assert_eq!(route.route, vec![0, 1]);
        assert_eq!(route.earliest, earliest);
        assert_eq!(route.latest, latest);
        assert_eq!(route.action_time, action_time);
    }

    #[test]
    fn test_incremental_matches_one_shot_build() {
        let problem = ProblemFixture::new(4)
            .travel_secs(600)
            .job(|j| {
                j.set_service(SignedDuration::from_secs(120));
            })
            .job(|j| {
                j.set_time_window(TimeWindow::from_iso(
                    Some("2025-06-10T09:00:00Z"),
                    Some("2025-06-10T12:00:00Z"),
                ));
            })
            .job(|_| {})
            .vehicle(|v| {
                v.set_time_window(shift());
            })
            .build();

        let mut incremental = TwRoute::new(&problem, 0).unwrap();
        incremental.add(&problem, 0, 0);
        incremental.add(&problem, 2, 1);
        incremental.add(&problem, 1, 1);

        let mut one_shot = TwRoute::new(&problem, 0).unwrap();
        let jobs = [0usize, 1, 2];
        one_shot.replace(&problem, problem.zero_amount(), jobs.iter().copied(), 0, 0);

        assert_eq!(incremental.route, one_shot.route);
        assert_eq!(incremental.earliest, one_shot.earliest);
        assert_eq!(incremental.latest, one_shot.latest);
        assert_eq!(incremental.action_time, one_shot.action_time);
        assert_eq!(incremental.earliest_end, one_shot.earliest_end);
    }

    #[test]
    fn test_setup_suppressed_on_shared_location() {
        let mut fixture = ProblemFixture::new(3).travel_secs(600);
        fixture = fixture.job(|j| {
            j.set_setup(SignedDuration::from_secs(60));
            j.set_service(SignedDuration::from_secs(30));
        });
        // Same location as job_0.
        fixture = fixture.job(|j| {
            j.set_location_id(1);
            j.set_setup(SignedDuration::from_secs(60));
            j.set_service(SignedDuration::from_secs(30));
        });
        let problem = fixture
            .vehicle(|v| {
                v.set_time_window(shift());
            })
            .build();

        let mut route = TwRoute::new(&problem, 0).unwrap();
        let jobs = [0usize, 1];
        route.replace(&problem, problem.zero_amount(), jobs.iter().copied(), 0, 0);

        assert_eq!(route.action_time[0], SignedDuration::from_secs(90));
        // Setup suppressed for the second stop at the same location.
        assert_eq!(route.action_time[1], SignedDuration::from_secs(30));
    }
}
