use fxhash::FxHashMap;

use crate::problem::{
    amount::{is_capacity_satisfied, Amount},
    job::{JobKind, JobRank},
    vehicle::VehicleRank,
    vehicle_routing_problem::{PinnedBoundaryRequirement, TagId, VehicleRoutingProblem},
};

/// Capacity and load bookkeeping for one vehicle's route, plus the insertion
/// gates that do not depend on the time schedule: pinned anchors, exclusive
/// tags and the first-leg distance bound.
///
/// All derived vectors are recomputed in O(route size * amount arity) by
/// `update_amounts`, which every mutator calls.
#[derive(Clone)]
pub struct RawRoute {
    pub v_rank: VehicleRank,
    pub v_type: usize,
    pub has_start: bool,
    pub has_end: bool,
    pub capacity: Amount,

    /// Job ranks in visit order.
    pub route: Vec<JobRank>,

    zero: Amount,

    // fwd_pickups[i] / fwd_deliveries[i] store the total single-job pickups /
    // deliveries up to rank i.
    fwd_pickups: Vec<Amount>,
    fwd_deliveries: Vec<Amount>,

    // bwd_pickups[i] / bwd_deliveries[i] store the total single-job pickups /
    // deliveries pending after rank i.
    bwd_pickups: Vec<Amount>,
    bwd_deliveries: Vec<Amount>,

    // pd_loads[i] stores the shipment load carried at rank i (included).
    pd_loads: Vec<Amount>,

    // Number of shipment pickups / deliveries up to rank i. A delivery can
    // never precede its pickup.
    nb_pickups: Vec<u32>,
    nb_deliveries: Vec<u32>,

    // current_loads[s] stores the vehicle load at *step* s. Step 0 is the
    // start, step i + 1 is right after the job at rank i.
    current_loads: Vec<Amount>,

    // Component-wise running peak of current_loads up to / after step s.
    fwd_peaks: Vec<Amount>,
    bwd_peaks: Vec<Amount>,

    delivery_margin: Amount,
    pickup_margin: Amount,

    exclusive_tag_counts: FxHashMap<TagId, u32>,
}

impl RawRoute {
    pub fn new(problem: &VehicleRoutingProblem, v_rank: VehicleRank) -> Self {
        let vehicle = problem.vehicle(v_rank);
        let zero = problem.zero_amount().clone();

        RawRoute {
            v_rank,
            v_type: vehicle.type_rank(),
            has_start: vehicle.has_start(),
            has_end: vehicle.has_end(),
            capacity: vehicle.capacity().clone(),
            route: Vec::new(),
            fwd_pickups: Vec::new(),
            fwd_deliveries: Vec::new(),
            bwd_pickups: Vec::new(),
            bwd_deliveries: Vec::new(),
            pd_loads: Vec::new(),
            nb_pickups: Vec::new(),
            nb_deliveries: Vec::new(),
            current_loads: vec![zero.clone(); 2],
            fwd_peaks: vec![zero.clone(); 2],
            bwd_peaks: vec![zero.clone(); 2],
            delivery_margin: vehicle.capacity().clone(),
            pickup_margin: vehicle.capacity().clone(),
            exclusive_tag_counts: FxHashMap::default(),
            zero,
        }
    }

    pub fn set_route(&mut self, problem: &VehicleRoutingProblem, route: Vec<JobRank>) {
        self.route = route;
        self.update_amounts(problem);
    }

    pub fn is_route_empty(&self) -> bool {
        self.route.is_empty()
    }

    pub fn size(&self) -> usize {
        self.route.len()
    }

    pub fn update_amounts(&mut self, problem: &VehicleRoutingProblem) {
        let n = self.route.len();
        let step_size = n + 2;
        self.fwd_pickups.resize(n, self.zero.clone());
        self.fwd_deliveries.resize(n, self.zero.clone());
        self.bwd_pickups.resize(n, self.zero.clone());
        self.bwd_deliveries.resize(n, self.zero.clone());
        self.pd_loads.resize(n, self.zero.clone());
        self.nb_pickups.resize(n, 0);
        self.nb_deliveries.resize(n, 0);
        self.current_loads.resize(step_size, self.zero.clone());
        self.fwd_peaks.resize(step_size, self.zero.clone());
        self.bwd_peaks.resize(step_size, self.zero.clone());

        self.exclusive_tag_counts.clear();
        for &job_rank in &self.route {
            for &tag in problem.exclusive_tag_ids(job_rank) {
                *self.exclusive_tag_counts.entry(tag).or_insert(0) += 1;
            }
        }

        if self.route.is_empty() {
            // Keep peak and load checks consistent with empty routes.
            self.fwd_peaks.fill(self.zero.clone());
            self.bwd_peaks.fill(self.zero.clone());
            self.current_loads.fill(self.zero.clone());
            self.delivery_margin.update(&self.capacity);
            self.pickup_margin.update(&self.capacity);
            return;
        }

        let mut current_pickups = self.zero.clone();
        let mut current_deliveries = self.zero.clone();
        let mut current_pd_load = self.zero.clone();
        let mut current_nb_pickups = 0;
        let mut current_nb_deliveries = 0;

        for i in 0..n {
            let job = problem.job(self.route[i]);
            match job.kind() {
                JobKind::Single => {
                    current_pickups += job.pickup();
                    current_deliveries += job.delivery();
                }
                JobKind::Pickup => {
                    current_pd_load += job.pickup();
                    current_nb_pickups += 1;
                }
                JobKind::Delivery => {
                    debug_assert!(is_capacity_satisfied(&current_pd_load, job.delivery()));
                    current_pd_load -= job.delivery();
                    current_nb_deliveries += 1;
                }
            }
            self.fwd_pickups[i].update(&current_pickups);
            self.fwd_deliveries[i].update(&current_deliveries);
            self.pd_loads[i].update(&current_pd_load);
            debug_assert!(current_nb_deliveries <= current_nb_pickups);
            self.nb_pickups[i] = current_nb_pickups;
            self.nb_deliveries[i] = current_nb_deliveries;
        }
        debug_assert!(self.pd_loads[n - 1].is_empty());

        current_deliveries.reset();
        current_pickups.reset();

        self.current_loads[n + 1].update(&self.fwd_pickups[n - 1]);

        for i in (0..n).rev() {
            self.bwd_deliveries[i].update(&current_deliveries);
            self.bwd_pickups[i].update(&current_pickups);
            self.current_loads[i + 1]
                .update(&(&(&self.fwd_pickups[i] + &self.pd_loads[i]) + &current_deliveries));

            let job = problem.job(self.route[i]);
            if job.kind() == JobKind::Single {
                current_deliveries += job.delivery();
                current_pickups += job.pickup();
            }
        }
        self.current_loads[0].update(&current_deliveries);

        let mut peak = self.current_loads[0].clone();
        self.fwd_peaks[0].update(&peak);
        for s in 1..step_size {
            peak.update_max(&self.current_loads[s]);
            self.fwd_peaks[s].update(&peak);
        }

        peak.update(&self.current_loads[step_size - 1]);
        self.bwd_peaks[step_size - 1].update(&peak);
        for s in (0..step_size - 1).rev() {
            peak.update_max(&self.current_loads[s]);
            self.bwd_peaks[s].update(&peak);
        }

        self.delivery_margin
            .update(&(&self.capacity - &self.current_loads[0]));
        self.pickup_margin
            .update(&(&self.capacity - &self.fwd_pickups[n - 1]));
    }

    pub fn fwd_peak(&self, step: usize) -> &Amount {
        &self.fwd_peaks[step]
    }

    pub fn bwd_peak(&self, step: usize) -> &Amount {
        &self.bwd_peaks[step]
    }

    pub fn max_load(&self) -> &Amount {
        self.fwd_peaks.last().expect("peaks are never empty")
    }

    pub fn load_at_step(&self, step: usize) -> &Amount {
        &self.current_loads[step]
    }

    pub fn job_deliveries_sum(&self) -> &Amount {
        if self.route.is_empty() {
            &self.zero
        } else {
            &self.current_loads[0]
        }
    }

    pub fn job_pickups_sum(&self) -> &Amount {
        if self.route.is_empty() {
            &self.zero
        } else {
            self.fwd_pickups.last().expect("route is not empty")
        }
    }

    pub fn delivery_margin(&self) -> &Amount {
        &self.delivery_margin
    }

    pub fn pickup_margin(&self) -> &Amount {
        &self.pickup_margin
    }

    pub fn exclusive_tag_count(&self, tag: TagId) -> u32 {
        self.exclusive_tag_counts.get(&tag).copied().unwrap_or(0)
    }

    /// Max load of the sub-route spanning [0; rank).
    pub fn sub_route_max_load_before(&self, rank: usize) -> Amount {
        debug_assert!(0 < rank && rank < self.route.len());
        &self.fwd_peaks[rank] - &self.bwd_deliveries[rank - 1]
    }

    /// Max load of the sub-route spanning [rank; size).
    pub fn sub_route_max_load_after(&self, rank: usize) -> Amount {
        debug_assert!(0 < rank && rank < self.route.len());
        &self.bwd_peaks[rank] - &self.fwd_pickups[rank - 1]
    }

    pub fn has_pending_delivery_after_rank(&self, rank: usize) -> bool {
        self.nb_deliveries[rank] < self.nb_pickups[rank]
    }

    pub fn has_delivery_after_rank(&self, rank: usize) -> bool {
        debug_assert!(rank < self.nb_deliveries.len());
        self.nb_deliveries[rank] < *self.nb_deliveries.last().expect("route is not empty")
    }

    pub fn has_pickup_up_to_rank(&self, rank: usize) -> bool {
        debug_assert!(rank < self.nb_pickups.len());
        0 < self.nb_pickups[rank]
    }

    /// Sum of single-job pickups over ranks [i; j).
    pub fn pickup_in_range(&self, i: usize, j: usize) -> Amount {
        debug_assert!(i <= j && j <= self.fwd_pickups.len());
        if i == j || self.route.is_empty() {
            return self.zero.clone();
        }
        if i == 0 {
            return self.fwd_pickups[j - 1].clone();
        }
        &self.fwd_pickups[j - 1] - &self.fwd_pickups[i - 1]
    }

    /// Sum of single-job deliveries over ranks [i; j).
    pub fn delivery_in_range(&self, i: usize, j: usize) -> Amount {
        debug_assert!(i <= j && j <= self.bwd_deliveries.len());
        if i == j || self.route.is_empty() {
            return self.zero.clone();
        }
        let before_deliveries = if i == 0 {
            &self.current_loads[0]
        } else {
            &self.bwd_deliveries[i - 1]
        };
        before_deliveries - &self.bwd_deliveries[j - 1]
    }

    /// Extra delivery load must fit under the forward peak at rank and extra
    /// pickup load under the backward peak.
    pub fn is_valid_addition_for_capacity(
        &self,
        _problem: &VehicleRoutingProblem,
        pickup: &Amount,
        delivery: &Amount,
        rank: usize,
    ) -> bool {
        debug_assert!(rank <= self.route.len());

        is_capacity_satisfied(&self.capacity, &(&self.fwd_peaks[rank] + delivery))
            && is_capacity_satisfied(&self.capacity, &(&self.bwd_peaks[rank] + pickup))
    }

    pub fn is_valid_addition_for_load(
        &self,
        _problem: &VehicleRoutingProblem,
        pickup: &Amount,
        rank: usize,
    ) -> bool {
        debug_assert!(rank <= self.route.len());

        let load = if self.route.is_empty() {
            &self.zero
        } else {
            &self.current_loads[rank]
        };
        is_capacity_satisfied(&self.capacity, &(load + pickup))
    }

    /// Capacity still holds when the [first_rank; last_rank) range is replaced
    /// by a range with the given net pickup and delivery sums.
    pub fn is_valid_addition_for_capacity_margins(
        &self,
        _problem: &VehicleRoutingProblem,
        pickup: &Amount,
        delivery: &Amount,
        first_rank: usize,
        last_rank: usize,
    ) -> bool {
        debug_assert!(!self.route.is_empty());
        debug_assert!(1 <= last_rank && last_rank <= self.route.len());

        let first_deliveries = if first_rank == 0 {
            &self.current_loads[0]
        } else {
            &self.bwd_deliveries[first_rank - 1]
        };
        let first_pickups = if first_rank == 0 {
            &self.zero
        } else {
            &self.fwd_pickups[first_rank - 1]
        };

        let replaced_deliveries = first_deliveries - &self.bwd_deliveries[last_rank - 1];

        is_capacity_satisfied(
            &(&self.capacity + &replaced_deliveries),
            &(&self.fwd_peaks[first_rank] + delivery),
        ) && is_capacity_satisfied(
            &(&(&self.capacity + &self.fwd_pickups[last_rank - 1]) - first_pickups),
            &(&self.bwd_peaks[last_rank] + pickup),
        )
    }

    /// Simulates replacing [first_rank; last_rank) with the given job
    /// sequence, walking the running load job by job. Also applies the pinned
    /// anchor and exclusive tag gates.
    pub fn is_valid_addition_for_capacity_inclusion(
        &self,
        problem: &VehicleRoutingProblem,
        mut delivery: Amount,
        jobs: impl ExactSizeIterator<Item = JobRank> + Clone,
        first_rank: usize,
        last_rank: usize,
    ) -> bool {
        debug_assert!(first_rank <= last_rank);
        debug_assert!(last_rank <= self.route.len());

        if !self.is_valid_range_for_pinned_anchors(problem, jobs.clone(), first_rank, last_rank)
            || !self.is_valid_range_for_exclusive_tags(problem, jobs.clone(), first_rank, last_rank)
        {
            return false;
        }

        let init_load = if self.route.is_empty() {
            &self.zero
        } else {
            &self.current_loads[0]
        };
        let first_deliveries = if first_rank == 0 {
            init_load
        } else {
            &self.bwd_deliveries[first_rank - 1]
        };
        let last_deliveries = if last_rank == 0 {
            init_load
        } else {
            &self.bwd_deliveries[last_rank - 1]
        };

        let replaced_deliveries = first_deliveries - last_deliveries;

        delivery += if self.route.is_empty() {
            &self.zero
        } else {
            &self.current_loads[first_rank]
        };
        delivery -= &replaced_deliveries;

        let mut valid = is_capacity_satisfied(&self.capacity, &delivery);

        for job_rank in jobs {
            if !valid {
                break;
            }
            let job = problem.job(job_rank);
            delivery += job.pickup();
            delivery -= job.delivery();
            valid = is_capacity_satisfied(&self.capacity, &delivery);
        }

        valid
    }

    /// Single-insertion gate with no time-window logic: pinned anchors and
    /// the first-leg distance bound.
    pub fn is_valid_addition_for_tw(
        &self,
        problem: &VehicleRoutingProblem,
        job_rank: JobRank,
        rank: usize,
    ) -> bool {
        if let Some(requirement) = problem.pinned_first_for_vehicle(self.v_rank) {
            match requirement {
                PinnedBoundaryRequirement::Single(pinned) => {
                    if rank == 0 && job_rank != pinned {
                        return false;
                    }
                }
                PinnedBoundaryRequirement::Shipment { .. } => {
                    // Keep [pickup, delivery] contiguous at the head.
                    if rank <= 1 {
                        return false;
                    }
                }
            }
        }

        if let Some(requirement) = problem.pinned_last_for_vehicle(self.v_rank) {
            match requirement {
                PinnedBoundaryRequirement::Single(pinned) => {
                    if rank == self.route.len() && job_rank != pinned {
                        return false;
                    }
                }
                PinnedBoundaryRequirement::Shipment { .. } => {
                    if rank >= self.route.len().saturating_sub(1) {
                        return false;
                    }
                }
            }
        }

        if rank == 0 && !self.is_first_leg_within_limit(problem, job_rank) {
            return false;
        }

        true
    }

    /// Range variant of the TW-free gate: pinned anchors, exclusive tag
    /// resulting counts and the first-leg bound.
    pub fn is_valid_range_addition_for_tw(
        &self,
        problem: &VehicleRoutingProblem,
        jobs: impl ExactSizeIterator<Item = JobRank> + Clone,
        first_rank: usize,
        last_rank: usize,
    ) -> bool {
        if !self.is_valid_range_for_pinned_anchors(problem, jobs.clone(), first_rank, last_rank) {
            return false;
        }
        if !self.is_valid_range_for_exclusive_tags(problem, jobs.clone(), first_rank, last_rank) {
            return false;
        }
        let mut jobs = jobs;
        if first_rank == 0 {
            if let Some(head) = jobs.next() {
                if !self.is_first_leg_within_limit(problem, head) {
                    return false;
                }
            }
        }
        true
    }

    pub fn is_valid_removal(
        &self,
        _problem: &VehicleRoutingProblem,
        _rank: usize,
        _count: usize,
    ) -> bool {
        true
    }

    /// Reconstructs the head / tail of the route after the hypothetical
    /// replace and compares them with the vehicle's pinned anchors.
    pub(crate) fn is_valid_range_for_pinned_anchors(
        &self,
        problem: &VehicleRoutingProblem,
        jobs: impl ExactSizeIterator<Item = JobRank> + Clone,
        first_rank: usize,
        last_rank: usize,
    ) -> bool {
        let insert_len = jobs.len();

        if let Some(requirement) = problem.pinned_first_for_vehicle(self.v_rank) {
            match requirement {
                PinnedBoundaryRequirement::Single(pinned) => {
                    if first_rank == 0 {
                        let new_first = if insert_len > 0 {
                            jobs.clone().next()
                        } else {
                            self.route.get(last_rank).copied()
                        };
                        if new_first != Some(pinned) {
                            return false;
                        }
                    }
                }
                PinnedBoundaryRequirement::Shipment { pickup, delivery } => {
                    if first_rank == 0 {
                        let mut inserted = jobs.clone();
                        let (n0, n1) = match insert_len {
                            0 => (
                                self.route.get(last_rank).copied(),
                                self.route.get(last_rank + 1).copied(),
                            ),
                            1 => (inserted.next(), self.route.get(last_rank).copied()),
                            _ => (inserted.next(), inserted.next()),
                        };
                        if n0 != Some(pickup) || n1 != Some(delivery) {
                            return false;
                        }
                    }
                    // No insertion may split the pair when it already heads
                    // the route.
                    if first_rank == 1
                        && insert_len > 0
                        && self.route.len() >= 2
                        && self.route[0] == pickup
                        && self.route[1] == delivery
                    {
                        return false;
                    }
                }
            }
        }

        if let Some(requirement) = problem.pinned_last_for_vehicle(self.v_rank) {
            match requirement {
                PinnedBoundaryRequirement::Single(pinned) => {
                    if last_rank == self.route.len() {
                        let new_last = if insert_len > 0 {
                            jobs.clone().last()
                        } else if first_rank > 0 {
                            Some(self.route[first_rank - 1])
                        } else {
                            None
                        };
                        if new_last != Some(pinned) {
                            return false;
                        }
                    }
                }
                PinnedBoundaryRequirement::Shipment { pickup, delivery } => {
                    if last_rank == self.route.len() {
                        if insert_len < 2 {
                            return false;
                        }
                        let mut tail = jobs.clone().skip(insert_len - 2);
                        if tail.next() != Some(pickup) || tail.next() != Some(delivery) {
                            return false;
                        }
                    }
                    if first_rank == self.route.len().saturating_sub(1)
                        && insert_len > 0
                        && self.route.len() >= 2
                        && self.route[self.route.len() - 2] == pickup
                        && self.route[self.route.len() - 1] == delivery
                    {
                        return false;
                    }
                }
            }
        }

        true
    }

    /// Resulting tag counts after the edit must stay within the vehicle's
    /// limits.
    pub(crate) fn is_valid_range_for_exclusive_tags(
        &self,
        problem: &VehicleRoutingProblem,
        jobs: impl Iterator<Item = JobRank>,
        first_rank: usize,
        last_rank: usize,
    ) -> bool {
        let mut deltas: FxHashMap<TagId, i64> = FxHashMap::default();
        for job_rank in jobs {
            for &tag in problem.exclusive_tag_ids(job_rank) {
                *deltas.entry(tag).or_insert(0) += 1;
            }
        }
        if deltas.is_empty() && self.exclusive_tag_counts.is_empty() {
            return true;
        }
        for &job_rank in &self.route[first_rank..last_rank.min(self.route.len())] {
            for &tag in problem.exclusive_tag_ids(job_rank) {
                *deltas.entry(tag).or_insert(0) -= 1;
            }
        }

        deltas.into_iter().all(|(tag, delta)| {
            let count = i64::from(self.exclusive_tag_count(tag)) + delta;
            count <= i64::from(problem.exclusive_tag_limit(self.v_rank, tag))
        })
    }

    /// First-leg bound only applies to vehicles with a start, no seeded
    /// workload and a finite limit.
    pub(crate) fn is_first_leg_within_limit(
        &self,
        problem: &VehicleRoutingProblem,
        head_job: JobRank,
    ) -> bool {
        let vehicle = problem.vehicle(self.v_rank);
        let (Some(start), Some(limit)) = (vehicle.start_location(), vehicle.max_first_leg_distance())
        else {
            return true;
        };
        if !problem.seeded_ranks(self.v_rank).is_empty() {
            return true;
        }

        problem.distance(self.v_rank, start, problem.job(head_job).location_id()) <= limit
    }

    pub fn add(&mut self, problem: &VehicleRoutingProblem, job_rank: JobRank, rank: usize) {
        debug_assert!(rank <= self.route.len());
        self.route.insert(rank, job_rank);
        self.update_amounts(problem);
    }

    pub fn remove(&mut self, problem: &VehicleRoutingProblem, rank: usize, count: usize) {
        debug_assert!(rank + count <= self.route.len());
        self.route.drain(rank..rank + count);
        self.update_amounts(problem);
    }

    /// Replaces [first_rank; last_rank) with the given sequence.
    pub fn replace(
        &mut self,
        problem: &VehicleRoutingProblem,
        jobs: impl ExactSizeIterator<Item = JobRank>,
        first_rank: usize,
        last_rank: usize,
    ) {
        debug_assert!(first_rank <= last_rank);
        debug_assert!(last_rank <= self.route.len());

        self.route.splice(first_rank..last_rank, jobs);
        self.update_amounts(problem);
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::problem::job::PinnedPosition;
    use crate::test_utils::ProblemFixture;

    fn problem_with_loads() -> crate::problem::vehicle_routing_problem::VehicleRoutingProblem {
        ProblemFixture::new(8)
            .job(|j| {
                j.set_delivery(Amount::from_vec(vec![10]));
            })
            .job(|j| {
                j.set_pickup(Amount::from_vec(vec![10]));
            })
            .job(|j| {
                j.set_delivery(Amount::from_vec(vec![20]));
            })
            .shipment(
                |p| {
                    p.set_amount(Amount::from_vec(vec![5]));
                },
                |d| {
                    d.set_amount(Amount::from_vec(vec![5]));
                },
            )
            .vehicle(|v| {
                v.set_capacity(Amount::from_vec(vec![40]));
            })
            .build()
    }

    #[test]
    fn test_update_amounts_bookkeeping() {
        let problem = problem_with_loads();
        let mut route = RawRoute::new(&problem, 0);

        // delivery(10), pickup(10), delivery(20)
        route.set_route(&problem, vec![0, 1, 2]);

        assert_eq!(route.size(), 3);
        assert_eq!(route.load_at_step(0), &Amount::from_vec(vec![30]));
        assert_eq!(route.load_at_step(1), &Amount::from_vec(vec![20]));
        assert_eq!(route.load_at_step(2), &Amount::from_vec(vec![30]));
        assert_eq!(route.load_at_step(3), &Amount::from_vec(vec![10]));
        assert_eq!(route.load_at_step(4), &Amount::from_vec(vec![10]));

        assert_eq!(route.max_load(), &Amount::from_vec(vec![30]));
        assert_eq!(route.fwd_peak(0), &Amount::from_vec(vec![30]));
        assert_eq!(route.bwd_peak(3), &Amount::from_vec(vec![10]));

        assert_eq!(route.delivery_margin(), &Amount::from_vec(vec![10]));
        assert_eq!(route.pickup_margin(), &Amount::from_vec(vec![30]));

        assert_eq!(route.job_deliveries_sum(), &Amount::from_vec(vec![30]));
        assert_eq!(route.job_pickups_sum(), &Amount::from_vec(vec![10]));
    }

    #[test]
    fn test_update_amounts_with_shipment() {
        let problem = problem_with_loads();
        let mut route = RawRoute::new(&problem, 0);

        // delivery(10), shipment pickup(5), shipment delivery(5), pickup(10)
        route.set_route(&problem, vec![0, 3, 4, 1]);

        // Shipment load is zero at route end.
        assert_eq!(route.load_at_step(5), &Amount::from_vec(vec![10]));
        assert!(route.has_pickup_up_to_rank(1));
        assert!(route.has_pending_delivery_after_rank(1));
        assert!(!route.has_pending_delivery_after_rank(2));
        assert!(route.has_delivery_after_rank(1));
        assert!(!route.has_delivery_after_rank(2));

        assert_eq!(route.pickup_in_range(0, 4), Amount::from_vec(vec![10]));
        assert_eq!(route.delivery_in_range(0, 1), Amount::from_vec(vec![10]));
        assert_eq!(route.delivery_in_range(1, 4), Amount::from_vec(vec![0]));
    }

    #[test]
    fn test_empty_route_is_all_zero() {
        let problem = problem_with_loads();
        let mut route = RawRoute::new(&problem, 0);

        route.set_route(&problem, vec![0]);
        route.set_route(&problem, vec![]);

        assert!(route.is_route_empty());
        assert_eq!(route.load_at_step(0), problem.zero_amount());
        assert_eq!(route.load_at_step(1), problem.zero_amount());
        assert_eq!(route.max_load(), problem.zero_amount());
        assert_eq!(route.delivery_margin(), &Amount::from_vec(vec![40]));
        assert_eq!(route.pickup_margin(), &Amount::from_vec(vec![40]));
    }

    #[test]
    fn test_is_valid_addition_for_capacity() {
        let problem = problem_with_loads();
        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0, 1, 2]);

        // Peak load is 30 out of 40: ten more fits, eleven does not.
        let fits = Amount::from_vec(vec![10]);
        let too_much = Amount::from_vec(vec![11]);

        assert!(route.is_valid_addition_for_capacity(&problem, &fits, &fits, 1));
        assert!(!route.is_valid_addition_for_capacity(
            &problem,
            &too_much,
            &problem.zero_amount().clone(),
            1
        ));
        assert!(!route.is_valid_addition_for_capacity(
            &problem,
            &problem.zero_amount().clone(),
            &too_much,
            1
        ));
    }

    #[test]
    fn test_is_valid_addition_for_load() {
        let problem = problem_with_loads();
        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0, 1, 2]);

        // Load before rank 2 is 30.
        assert!(route.is_valid_addition_for_load(&problem, &Amount::from_vec(vec![10]), 2));
        assert!(!route.is_valid_addition_for_load(&problem, &Amount::from_vec(vec![11]), 2));
    }

    #[test]
    fn test_capacity_inclusion_walks_running_load() {
        let problem = problem_with_loads();
        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0, 2]);

        // Insert the shipment pair between the two deliveries: fine.
        let jobs = [3usize, 4];
        assert!(route.is_valid_addition_for_capacity_inclusion(
            &problem,
            problem.zero_amount().clone(),
            jobs.iter().copied(),
            1,
            1,
        ));

        // Replacing the whole route with deliveries beyond capacity fails.
        let jobs = [0usize, 2, 2];
        assert!(!route.is_valid_addition_for_capacity_inclusion(
            &problem,
            Amount::from_vec(vec![50]),
            jobs.iter().copied(),
            0,
            2,
        ));
    }

    #[test]
    fn test_round_trip_add_remove() {
        let problem = problem_with_loads();
        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0, 2]);

        let snapshot = route.route.clone();
        let loads_before: Vec<Amount> = (0..4).map(|s| route.load_at_step(s).clone()).collect();

        route.add(&problem, 1, 1);
        route.remove(&problem, 1, 1);

        assert_eq!(route.route, snapshot);
        let loads_after: Vec<Amount> = (0..4).map(|s| route.load_at_step(s).clone()).collect();
        assert_eq!(loads_before, loads_after);
    }

    #[test]
    fn test_round_trip_replace() {
        let problem = problem_with_loads();
        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0, 1, 2]);

        let snapshot = route.route.clone();

        let replacement = [3usize, 4];
        route.replace(&problem, replacement.iter().copied(), 1, 2);
        assert_eq!(route.route, vec![0, 3, 4, 2]);

        let original = [1usize];
        route.replace(&problem, original.iter().copied(), 1, 3);
        assert_eq!(route.route, snapshot);
    }

    fn pinned_first_problem() -> crate::problem::vehicle_routing_problem::VehicleRoutingProblem {
        ProblemFixture::new(6)
            .job(|j| {
                j.set_pinned(true);
                j.set_pinned_position(PinnedPosition::First);
            })
            .job(|_| {})
            .job(|_| {})
            .vehicle(|v| {
                v.set_steps(vec!["job_0".into()]);
            })
            .build()
    }

    #[test]
    fn test_pinned_first_single_blocks_head_insertions() {
        let problem = pinned_first_problem();
        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0]);

        // Inserting another job at rank 0 would displace the anchor.
        assert!(!route.is_valid_addition_for_tw(&problem, 1, 0));
        assert!(route.is_valid_addition_for_tw(&problem, 1, 1));

        // Range form: replacing the head with something else fails, keeping
        // the anchor first succeeds.
        let jobs = [1usize];
        assert!(!route.is_valid_range_addition_for_tw(&problem, jobs.iter().copied(), 0, 1));
        let jobs = [0usize, 1];
        assert!(route.is_valid_range_addition_for_tw(&problem, jobs.iter().copied(), 0, 1));

        // Removing the anchor without replacement fails too.
        assert!(!route.is_valid_range_addition_for_tw(&problem, [].iter().copied(), 0, 1));
    }

    #[test]
    fn test_pinned_first_shipment_keeps_pair_contiguous() {
        let problem = ProblemFixture::new(6)
            .shipment(
                |p| {
                    p.set_pinned(true);
                    p.set_pinned_position(PinnedPosition::First);
                },
                |d| {
                    d.set_pinned(true);
                },
            )
            .job(|_| {})
            .vehicle(|v| {
                v.set_steps(vec!["p_0".into(), "d_0".into()]);
            })
            .build();

        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0, 1]);

        // Single insertions at ranks 0 and 1 are both rejected.
        assert!(!route.is_valid_addition_for_tw(&problem, 2, 0));
        assert!(!route.is_valid_addition_for_tw(&problem, 2, 1));
        assert!(route.is_valid_addition_for_tw(&problem, 2, 2));

        // Splitting the pair through a range insertion at rank 1 is rejected.
        let jobs = [2usize];
        assert!(!route.is_valid_range_addition_for_tw(&problem, jobs.iter().copied(), 1, 1));
        assert!(route.is_valid_range_addition_for_tw(&problem, jobs.iter().copied(), 2, 2));
    }

    #[test]
    fn test_pinned_last_single() {
        let problem = ProblemFixture::new(6)
            .job(|j| {
                j.set_pinned(true);
                j.set_pinned_position(PinnedPosition::Last);
            })
            .job(|_| {})
            .vehicle(|v| {
                v.set_steps(vec!["job_0".into()]);
            })
            .build();

        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0]);

        assert!(!route.is_valid_addition_for_tw(&problem, 1, 1));
        assert!(route.is_valid_addition_for_tw(&problem, 1, 0));

        // Appending via range replace must end with the anchor.
        let jobs = [1usize];
        assert!(!route.is_valid_range_addition_for_tw(&problem, jobs.iter().copied(), 1, 1));
        let jobs = [1usize, 0];
        assert!(route.is_valid_range_addition_for_tw(&problem, jobs.iter().copied(), 0, 1));
    }

    #[test]
    fn test_exclusive_tag_limit() {
        let problem = ProblemFixture::new(6)
            .job(|j| {
                j.add_exclusive_tag("fridge");
            })
            .job(|j| {
                j.add_exclusive_tag("fridge");
            })
            .job(|_| {})
            .vehicle(|_| {})
            .build();

        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0]);

        let tag = problem.exclusive_tag_ids(0)[0];
        assert_eq!(route.exclusive_tag_count(tag), 1);

        // A second tagged task is rejected, an untagged one accepted.
        let tagged = [1usize];
        assert!(!route.is_valid_range_addition_for_tw(&problem, tagged.iter().copied(), 1, 1));
        let untagged = [2usize];
        assert!(route.is_valid_range_addition_for_tw(&problem, untagged.iter().copied(), 1, 1));

        // Swapping one tagged task for the other keeps the count at one.
        assert!(route.is_valid_range_addition_for_tw(&problem, tagged.iter().copied(), 0, 1));
    }

    #[test]
    fn test_first_leg_distance_bound() {
        let problem = ProblemFixture::new(3)
            .durations(vec![
                vec![0, 100, 600],
                vec![100, 0, 100],
                vec![600, 100, 0],
            ])
            .job(|_| {})
            .job(|_| {})
            .vehicle(|v| {
                v.set_max_first_leg_distance(500);
            })
            .build();

        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![]);

        // job_0 sits 100 away from the start, job_1 600 away.
        assert!(route.is_valid_addition_for_tw(&problem, 0, 0));
        assert!(!route.is_valid_addition_for_tw(&problem, 1, 0));

        let jobs = [1usize, 0];
        assert!(!route.is_valid_range_addition_for_tw(&problem, jobs.iter().copied(), 0, 0));
        let jobs = [0usize, 1];
        assert!(route.is_valid_range_addition_for_tw(&problem, jobs.iter().copied(), 0, 0));
    }

    #[test]
    fn test_capacity_margins_for_range_replacement() {
        let problem = problem_with_loads();
        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0, 1, 2]);

        // Replacing the middle job frees its pickup of 10: a replacement
        // range with pickup 20 fits, 21 does not.
        assert!(route.is_valid_addition_for_capacity_margins(
            &problem,
            &Amount::from_vec(vec![20]),
            &Amount::from_vec(vec![0]),
            1,
            2,
        ));
        assert!(!route.is_valid_addition_for_capacity_margins(
            &problem,
            &Amount::from_vec(vec![21]),
            &Amount::from_vec(vec![0]),
            1,
            2,
        ));
    }

    #[test]
    fn test_inclusion_predicate_guarantees_capacity_after_replace() {
        let problem = problem_with_loads();
        let mut route = RawRoute::new(&problem, 0);
        route.set_route(&problem, vec![0, 2]);

        let jobs = [3usize, 4];
        assert!(route.is_valid_addition_for_capacity_inclusion(
            &problem,
            problem.zero_amount().clone(),
            jobs.iter().copied(),
            1,
            1,
        ));

        route.replace(&problem, jobs.iter().copied(), 1, 1);
        assert!(is_capacity_satisfied(&route.capacity, route.max_load()));
    }

    #[test]
    fn test_recompute_from_scratch_matches_incremental() {
        let problem = problem_with_loads();
        let mut incremental = RawRoute::new(&problem, 0);
        incremental.set_route(&problem, vec![0, 2]);
        incremental.add(&problem, 3, 1);
        incremental.add(&problem, 4, 2);
        incremental.remove(&problem, 3, 1);

        let mut fresh = RawRoute::new(&problem, 0);
        fresh.set_route(&problem, incremental.route.clone());

        for s in 0..incremental.size() + 2 {
            assert_eq!(incremental.load_at_step(s), fresh.load_at_step(s));
            assert_eq!(incremental.fwd_peak(s), fresh.fwd_peak(s));
            assert_eq!(incremental.bwd_peak(s), fresh.bwd_peak(s));
        }
        assert_eq!(incremental.delivery_margin(), fresh.delivery_margin());
        assert_eq!(incremental.pickup_margin(), fresh.pickup_margin());
    }
}
