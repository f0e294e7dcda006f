use jiff::SignedDuration;

use crate::problem::{
    error::ProblemError,
    job::{Job, JobBuilder, JobKind},
    travel_cost_matrix::TravelMatrices,
    vehicle::{Vehicle, VehicleBuilder},
    vehicle_routing_problem::{VehicleRoutingProblem, VehicleRoutingProblemBuilder},
};

/// Constant matrix: `secs` seconds / meters between any two distinct
/// locations.
pub(crate) fn constant_matrix(num_locations: usize, secs: i64) -> TravelMatrices {
    let durations = (0..num_locations)
        .map(|i| {
            (0..num_locations)
                .map(|j| if i == j { 0 } else { secs })
                .collect()
        })
        .collect();
    TravelMatrices::from_durations(durations)
}

/// Problem fixture with one location per task and a shared depot at location
/// 0. Jobs get ids `job_<n>`, shipments `p_<n>` / `d_<n>`, vehicles
/// `vehicle_<n>`; the closure may override any default.
pub(crate) struct ProblemFixture {
    num_locations: usize,
    durations: Option<Vec<Vec<i64>>>,
    travel_secs: i64,
    jobs: Vec<Job>,
    vehicles: Vec<Vehicle>,
    next_location: usize,
    next_job: usize,
    next_shipment: usize,
    pinned_soft_timing: bool,
    pinned_violation_budget: SignedDuration,
    include_action_time_in_budget: bool,
    budget_densify_candidates_k: Option<u32>,
}

impl ProblemFixture {
    pub(crate) fn new(num_locations: usize) -> Self {
        ProblemFixture {
            num_locations,
            durations: None,
            travel_secs: 60,
            jobs: Vec::new(),
            vehicles: Vec::new(),
            next_location: 1,
            next_job: 0,
            next_shipment: 0,
            pinned_soft_timing: false,
            pinned_violation_budget: SignedDuration::ZERO,
            include_action_time_in_budget: false,
            budget_densify_candidates_k: None,
        }
    }

    pub(crate) fn travel_secs(mut self, secs: i64) -> Self {
        self.travel_secs = secs;
        self
    }

    pub(crate) fn durations(mut self, durations: Vec<Vec<i64>>) -> Self {
        self.num_locations = durations.len();
        self.durations = Some(durations);
        self
    }

    pub(crate) fn soft_timing(mut self, budget: SignedDuration) -> Self {
        self.pinned_soft_timing = true;
        self.pinned_violation_budget = budget;
        self
    }

    pub(crate) fn include_action_time_in_budget(mut self) -> Self {
        self.include_action_time_in_budget = true;
        self
    }

    pub(crate) fn job(mut self, configure: impl FnOnce(&mut JobBuilder)) -> Self {
        let mut builder = JobBuilder::default();
        builder.set_external_id(format!("job_{}", self.next_job));
        builder.set_location_id(self.next_location);
        configure(&mut builder);
        self.jobs.push(builder.build());
        self.next_job += 1;
        self.next_location += 1;
        self
    }

    pub(crate) fn shipment(
        mut self,
        configure_pickup: impl FnOnce(&mut JobBuilder),
        configure_delivery: impl FnOnce(&mut JobBuilder),
    ) -> Self {
        let mut pickup = JobBuilder::default();
        pickup.set_external_id(format!("p_{}", self.next_shipment));
        pickup.set_location_id(self.next_location);
        pickup.set_kind(JobKind::Pickup);
        configure_pickup(&mut pickup);

        let mut delivery = JobBuilder::default();
        delivery.set_external_id(format!("d_{}", self.next_shipment));
        delivery.set_location_id(self.next_location + 1);
        delivery.set_kind(JobKind::Delivery);
        configure_delivery(&mut delivery);

        self.jobs.push(pickup.build());
        self.jobs.push(delivery.build());
        self.next_shipment += 1;
        self.next_location += 2;
        self
    }

    pub(crate) fn vehicle(mut self, configure: impl FnOnce(&mut VehicleBuilder)) -> Self {
        let mut builder = VehicleBuilder::default();
        builder.set_external_id(format!("vehicle_{}", self.vehicles.len()));
        builder.set_profile("car");
        builder.set_start_location(0);
        builder.set_end_location(0);
        configure(&mut builder);
        self.vehicles.push(builder.build());
        self
    }

    pub(crate) fn try_build(self) -> Result<VehicleRoutingProblem, ProblemError> {
        let mut builder = VehicleRoutingProblemBuilder::default();

        let matrices = match self.durations {
            Some(durations) => TravelMatrices::from_durations(durations),
            None => constant_matrix(self.num_locations, self.travel_secs),
        };
        builder.set_matrix("car", matrices);

        let mut jobs = self.jobs.into_iter();
        while let Some(job) = jobs.next() {
            if job.is_pickup() {
                let delivery = jobs.next().expect("shipment delivery follows its pickup");
                builder.add_shipment(job, delivery);
            } else {
                builder.add_job(job);
            }
        }
        for vehicle in self.vehicles {
            builder.add_vehicle(vehicle);
        }

        builder.set_pinned_soft_timing(self.pinned_soft_timing);
        builder.set_pinned_violation_budget(self.pinned_violation_budget);
        builder.set_include_action_time_in_budget(self.include_action_time_in_budget);
        if let Some(k) = self.budget_densify_candidates_k {
            builder.set_budget_densify_candidates_k(k);
        }

        builder.build()
    }

    pub(crate) fn build(self) -> VehicleRoutingProblem {
        self.try_build().expect("fixture problem must build")
    }
}
