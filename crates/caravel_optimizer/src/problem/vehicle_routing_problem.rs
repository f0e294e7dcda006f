use fxhash::FxHashMap;
use jiff::SignedDuration;
use tracing::debug;

use crate::problem::{
    amount::Amount,
    error::ProblemError,
    eval::{Cost, Distance, Eval},
    job::{Job, JobRank, PinnedPosition},
    travel_cost_matrix::TravelMatrices,
    vehicle::{Vehicle, VehicleRank},
};

pub type TagId = usize;

/// Hard positional requirement on the head or tail of a vehicle's route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinnedBoundaryRequirement {
    Single(JobRank),
    Shipment { pickup: JobRank, delivery: JobRank },
}

/// Immutable problem description shared by every search task. Route state
/// objects borrow it for the lifetime of a solve.
pub struct VehicleRoutingProblem {
    jobs: Vec<Job>,
    vehicles: Vec<Vehicle>,
    matrices: Vec<TravelMatrices>,
    matrix_by_vehicle: Vec<usize>,
    amount_size: usize,
    zero: Amount,

    pinned_soft_timing: bool,
    pinned_violation_budget: SignedDuration,
    include_action_time_in_budget: bool,
    budget_densify_candidates_k: u32,

    pinned_vehicle_by_job: Vec<Option<VehicleRank>>,
    pinned_first_by_vehicle: Vec<Option<PinnedBoundaryRequirement>>,
    pinned_last_by_vehicle: Vec<Option<PinnedBoundaryRequirement>>,
    seeded_ranks_by_vehicle: Vec<Vec<JobRank>>,
    tag_ids_by_job: Vec<Vec<TagId>>,
    tag_limits_by_vehicle: Vec<FxHashMap<TagId, u32>>,
    penalties: Vec<Vec<Cost>>,
    compatibility: Vec<Vec<bool>>,
}

impl VehicleRoutingProblem {
    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn vehicles(&self) -> &[Vehicle] {
        &self.vehicles
    }

    pub fn job(&self, rank: JobRank) -> &Job {
        &self.jobs[rank]
    }

    pub fn vehicle(&self, rank: VehicleRank) -> &Vehicle {
        &self.vehicles[rank]
    }

    pub fn amount_size(&self) -> usize {
        self.amount_size
    }

    pub fn zero_amount(&self) -> &Amount {
        &self.zero
    }

    pub fn duration(&self, v_rank: VehicleRank, from: usize, to: usize) -> SignedDuration {
        self.matrices[self.matrix_by_vehicle[v_rank]].travel_time(from, to)
    }

    pub fn distance(&self, v_rank: VehicleRank, from: usize, to: usize) -> Distance {
        self.matrices[self.matrix_by_vehicle[v_rank]].travel_distance(from, to)
    }

    /// Full travel evaluation of one edge. Cost comes from the profile's cost
    /// matrix when present and from the vehicle's hourly rate otherwise.
    pub fn eval(&self, v_rank: VehicleRank, from: usize, to: usize) -> Eval {
        let matrices = &self.matrices[self.matrix_by_vehicle[v_rank]];
        let duration = matrices.travel_time(from, to);
        let cost = matrices
            .travel_cost(from, to)
            .unwrap_or_else(|| self.vehicles[v_rank].cost_from_duration(duration));

        Eval::new(cost, duration, matrices.travel_distance(from, to))
    }

    pub fn pinned_vehicle(&self, job_rank: JobRank) -> Option<VehicleRank> {
        self.pinned_vehicle_by_job[job_rank]
    }

    pub fn pinned_first_for_vehicle(
        &self,
        v_rank: VehicleRank,
    ) -> Option<PinnedBoundaryRequirement> {
        self.pinned_first_by_vehicle[v_rank]
    }

    pub fn pinned_last_for_vehicle(
        &self,
        v_rank: VehicleRank,
    ) -> Option<PinnedBoundaryRequirement> {
        self.pinned_last_by_vehicle[v_rank]
    }

    pub fn seeded_ranks(&self, v_rank: VehicleRank) -> &[JobRank] {
        &self.seeded_ranks_by_vehicle[v_rank]
    }

    pub fn exclusive_tag_ids(&self, job_rank: JobRank) -> &[TagId] {
        &self.tag_ids_by_job[job_rank]
    }

    /// Route-level cap for a tag, default 1. Raised when the vehicle's seeded
    /// workload already duplicates the tag.
    pub fn exclusive_tag_limit(&self, v_rank: VehicleRank, tag: TagId) -> u32 {
        self.tag_limits_by_vehicle[v_rank]
            .get(&tag)
            .copied()
            .unwrap_or(1)
    }

    pub fn job_vehicle_penalty(&self, job_rank: JobRank, v_rank: VehicleRank) -> Cost {
        self.penalties[job_rank][v_rank]
    }

    pub fn vehicle_ok_with_job(&self, v_rank: VehicleRank, job_rank: JobRank) -> bool {
        self.compatibility[v_rank][job_rank]
    }

    pub fn pinned_soft_timing(&self) -> bool {
        self.pinned_soft_timing
    }

    pub fn pinned_violation_budget(&self) -> SignedDuration {
        self.pinned_violation_budget
    }

    pub fn include_action_time_in_budget(&self) -> bool {
        self.include_action_time_in_budget
    }

    pub fn budget_densify_candidates_k(&self) -> u32 {
        self.budget_densify_candidates_k
    }
}

#[derive(Default)]
pub struct VehicleRoutingProblemBuilder {
    jobs: Vec<Job>,
    vehicles: Vec<Vehicle>,
    matrices: Vec<(String, TravelMatrices)>,
    pinned_soft_timing: bool,
    pinned_violation_budget: SignedDuration,
    include_action_time_in_budget: bool,
    budget_densify_candidates_k: Option<u32>,
}

impl VehicleRoutingProblemBuilder {
    pub fn add_job(&mut self, job: Job) -> &mut Self {
        assert!(job.is_single(), "add_job expects a single job");
        self.jobs.push(job);
        self
    }

    /// Pushes both shipment halves, keeping the delivery right after its
    /// pickup in the job table.
    pub fn add_shipment(&mut self, pickup: Job, delivery: Job) -> &mut Self {
        assert!(pickup.is_pickup(), "add_shipment expects a pickup first");
        assert!(delivery.is_delivery(), "add_shipment expects a delivery second");
        self.jobs.push(pickup);
        self.jobs.push(delivery);
        self
    }

    pub fn add_vehicle(&mut self, vehicle: Vehicle) -> &mut Self {
        self.vehicles.push(vehicle);
        self
    }

    pub fn set_matrix(&mut self, profile: impl Into<String>, matrices: TravelMatrices) -> &mut Self {
        self.matrices.push((profile.into(), matrices));
        self
    }

    pub fn set_pinned_soft_timing(&mut self, pinned_soft_timing: bool) -> &mut Self {
        self.pinned_soft_timing = pinned_soft_timing;
        self
    }

    pub fn set_pinned_violation_budget(&mut self, budget: SignedDuration) -> &mut Self {
        self.pinned_violation_budget = budget;
        self
    }

    pub fn set_include_action_time_in_budget(&mut self, include: bool) -> &mut Self {
        self.include_action_time_in_budget = include;
        self
    }

    pub fn set_budget_densify_candidates_k(&mut self, k: u32) -> &mut Self {
        self.budget_densify_candidates_k = Some(k.max(1));
        self
    }

    pub fn build(self) -> Result<VehicleRoutingProblem, ProblemError> {
        let mut jobs = self.jobs;
        let mut vehicles = self.vehicles;

        check_shipment_adjacency(&jobs)?;
        check_shipment_deliveries(&jobs)?;
        let amount_size = check_amount_size(&jobs, &vehicles)?;

        // Intern vehicle types and resolve per-type job durations.
        let mut vehicle_types: Vec<String> = vec![String::new()];
        for vehicle in &mut vehicles {
            let type_name = vehicle.vehicle_type().to_owned();
            let rank = match vehicle_types.iter().position(|t| *t == type_name) {
                Some(rank) => rank,
                None => {
                    vehicle_types.push(type_name);
                    vehicle_types.len() - 1
                }
            };
            vehicle.type_rank = rank;
        }
        for job in &mut jobs {
            job.setups = vehicle_types
                .iter()
                .map(|t| {
                    job.setup_per_type()
                        .get(t)
                        .copied()
                        .unwrap_or_else(|| job.default_setup())
                })
                .collect();
            job.services = vehicle_types
                .iter()
                .map(|t| {
                    job.service_per_type()
                        .get(t)
                        .copied()
                        .unwrap_or_else(|| job.default_service())
                })
                .collect();
        }

        // Resolve routing profiles.
        let matrices: Vec<TravelMatrices> =
            self.matrices.iter().map(|(_, m)| m.clone()).collect();
        let matrix_by_vehicle = vehicles
            .iter()
            .map(|vehicle| {
                self.matrices
                    .iter()
                    .position(|(name, _)| name == vehicle.profile())
                    .ok_or_else(|| ProblemError::UnknownProfile {
                        profile: vehicle.profile().to_owned(),
                        vehicle: vehicle.external_id().to_owned(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let job_rank_by_id: FxHashMap<&str, JobRank> = jobs
            .iter()
            .enumerate()
            .map(|(rank, job)| (job.external_id(), rank))
            .collect();
        let vehicle_rank_by_id: FxHashMap<&str, VehicleRank> = vehicles
            .iter()
            .enumerate()
            .map(|(rank, vehicle)| (vehicle.external_id(), rank))
            .collect();

        // Seeded steps.
        let seeded_ranks_by_vehicle = vehicles
            .iter()
            .map(|vehicle| {
                vehicle
                    .steps()
                    .iter()
                    .map(|id| {
                        job_rank_by_id.get(id.as_str()).copied().ok_or_else(|| {
                            ProblemError::UnknownStepJob {
                                id: id.clone(),
                                vehicle: vehicle.external_id().to_owned(),
                            }
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<Vec<_>>, _>>()?;

        // Exclusive tags: intern names, then derive per-vehicle limits from
        // seeded duplicates.
        let mut tag_names: Vec<String> = Vec::new();
        let tag_ids_by_job: Vec<Vec<TagId>> = jobs
            .iter()
            .map(|job| {
                job.exclusive_tags()
                    .iter()
                    .map(|tag| match tag_names.iter().position(|t| t == tag) {
                        Some(id) => id,
                        None => {
                            tag_names.push(tag.clone());
                            tag_names.len() - 1
                        }
                    })
                    .collect()
            })
            .collect();
        let tag_limits_by_vehicle: Vec<FxHashMap<TagId, u32>> = seeded_ranks_by_vehicle
            .iter()
            .map(|ranks| {
                let mut counts: FxHashMap<TagId, u32> = FxHashMap::default();
                for &rank in ranks {
                    for &tag in &tag_ids_by_job[rank] {
                        *counts.entry(tag).or_insert(0) += 1;
                    }
                }
                counts.retain(|_, count| *count > 1);
                if !counts.is_empty() {
                    debug!(?counts, "raised exclusive tag limits from seeded steps");
                }
                counts
            })
            .collect();

        // Per-(job, vehicle) objective penalties.
        let mut penalties = vec![vec![0; vehicles.len()]; jobs.len()];
        for (rank, job) in jobs.iter().enumerate() {
            for (vehicle_id, penalty) in job.vehicle_penalties() {
                let v_rank = vehicle_rank_by_id
                    .get(vehicle_id.as_str())
                    .copied()
                    .ok_or_else(|| ProblemError::UnknownVehicle {
                        id: vehicle_id.clone(),
                        job: job.external_id().to_owned(),
                    })?;
                penalties[rank][v_rank] = *penalty;
            }
        }

        let pinned_vehicle_by_job =
            resolve_pinned_vehicles(&jobs, &vehicles, &seeded_ranks_by_vehicle)?;
        let (pinned_first_by_vehicle, pinned_last_by_vehicle) = resolve_pinned_boundaries(
            &jobs,
            &vehicles,
            &seeded_ranks_by_vehicle,
            &pinned_vehicle_by_job,
        )?;

        // Compatibility: skills, explicit allow-list, pinning.
        let compatibility: Vec<Vec<bool>> = vehicles
            .iter()
            .enumerate()
            .map(|(v_rank, vehicle)| {
                jobs.iter()
                    .enumerate()
                    .map(|(job_rank, job)| {
                        if !job.skills().is_subset(vehicle.skills()) {
                            return false;
                        }
                        if !job.allowed_vehicles().is_empty()
                            && !job
                                .allowed_vehicles()
                                .iter()
                                .any(|id| id == vehicle.external_id())
                        {
                            return false;
                        }
                        match pinned_vehicle_by_job[job_rank] {
                            Some(pinned) => pinned == v_rank,
                            None => true,
                        }
                    })
                    .collect()
            })
            .collect();

        Ok(VehicleRoutingProblem {
            zero: Amount::with_dimensions(amount_size),
            jobs,
            vehicles,
            matrices,
            matrix_by_vehicle,
            amount_size,
            pinned_soft_timing: self.pinned_soft_timing,
            pinned_violation_budget: self.pinned_violation_budget,
            include_action_time_in_budget: self.include_action_time_in_budget,
            budget_densify_candidates_k: self.budget_densify_candidates_k.unwrap_or(20),
            pinned_vehicle_by_job,
            pinned_first_by_vehicle,
            pinned_last_by_vehicle,
            seeded_ranks_by_vehicle,
            tag_ids_by_job,
            tag_limits_by_vehicle,
            penalties,
            compatibility,
        })
    }
}

fn check_shipment_adjacency(jobs: &[Job]) -> Result<(), ProblemError> {
    for (rank, job) in jobs.iter().enumerate() {
        if job.is_pickup()
            && jobs
                .get(rank + 1)
                .is_none_or(|delivery| !delivery.is_delivery())
        {
            return Err(ProblemError::BrokenShipmentAdjacency { pickup_rank: rank });
        }
    }
    Ok(())
}

fn check_shipment_deliveries(jobs: &[Job]) -> Result<(), ProblemError> {
    for job in jobs {
        if job.is_delivery()
            && (!job.exclusive_tags().is_empty()
                || job.budget() != 0
                || !job.vehicle_penalties().is_empty())
        {
            return Err(ProblemError::InvalidShipmentDelivery {
                id: job.external_id().to_owned(),
            });
        }
    }
    Ok(())
}

fn check_amount_size(jobs: &[Job], vehicles: &[Vehicle]) -> Result<usize, ProblemError> {
    let mut expected: Option<usize> = None;

    let mut check = |id: &str, amount: &Amount| -> Result<(), ProblemError> {
        if amount.len() == 0 {
            return Ok(());
        }
        match expected {
            None => {
                expected = Some(amount.len());
                Ok(())
            }
            Some(size) if size == amount.len() => Ok(()),
            Some(size) => Err(ProblemError::AmountArity {
                id: id.to_owned(),
                expected: size,
                got: amount.len(),
            }),
        }
    };

    for job in jobs {
        check(job.external_id(), job.pickup())?;
        check(job.external_id(), job.delivery())?;
    }
    for vehicle in vehicles {
        check(vehicle.external_id(), vehicle.capacity())?;
        for b in vehicle.breaks() {
            if let Some(max_load) = b.max_load() {
                check(vehicle.external_id(), max_load)?;
            }
        }
    }

    Ok(expected.unwrap_or(0))
}

fn resolve_pinned_vehicles(
    jobs: &[Job],
    vehicles: &[Vehicle],
    seeded_ranks_by_vehicle: &[Vec<JobRank>],
) -> Result<Vec<Option<VehicleRank>>, ProblemError> {
    let mut pinned_vehicle_by_job = vec![None; jobs.len()];

    for (rank, job) in jobs.iter().enumerate() {
        if job.is_pickup() {
            let delivery = &jobs[rank + 1];
            if job.pinned() != delivery.pinned() {
                return Err(ProblemError::PartiallyPinnedShipment {
                    id: job.external_id().to_owned(),
                });
            }
        }

        if !job.pinned() {
            continue;
        }

        let mut owners = seeded_ranks_by_vehicle
            .iter()
            .enumerate()
            .filter(|(_, ranks)| ranks.contains(&rank))
            .map(|(v_rank, _)| v_rank);

        let Some(owner) = owners.next() else {
            return Err(ProblemError::PinnedJobNotSeeded {
                id: job.external_id().to_owned(),
            });
        };
        if owners.next().is_some() {
            return Err(ProblemError::PinnedJobSeededTwice {
                id: job.external_id().to_owned(),
            });
        }

        if !job.allowed_vehicles().is_empty()
            && !job
                .allowed_vehicles()
                .iter()
                .any(|id| id == vehicles[owner].external_id())
        {
            return Err(ProblemError::PinnedVehicleNotAllowed {
                id: job.external_id().to_owned(),
                vehicle: vehicles[owner].external_id().to_owned(),
            });
        }

        pinned_vehicle_by_job[rank] = Some(owner);
    }

    Ok(pinned_vehicle_by_job)
}

#[allow(clippy::type_complexity)]
fn resolve_pinned_boundaries(
    jobs: &[Job],
    vehicles: &[Vehicle],
    seeded_ranks_by_vehicle: &[Vec<JobRank>],
    pinned_vehicle_by_job: &[Option<VehicleRank>],
) -> Result<
    (
        Vec<Option<PinnedBoundaryRequirement>>,
        Vec<Option<PinnedBoundaryRequirement>>,
    ),
    ProblemError,
> {
    let mut first_by_vehicle = vec![None; vehicles.len()];
    let mut last_by_vehicle = vec![None; vehicles.len()];

    for (rank, job) in jobs.iter().enumerate() {
        if job.pinned_position() == PinnedPosition::None || job.is_delivery() {
            continue;
        }

        let Some(v_rank) = pinned_vehicle_by_job[rank] else {
            // A pinned position without a pinned seed cannot be honored.
            return Err(ProblemError::PinnedJobNotSeeded {
                id: job.external_id().to_owned(),
            });
        };
        let seeds = &seeded_ranks_by_vehicle[v_rank];
        let mismatch = || ProblemError::PinnedPositionMismatch {
            id: job.external_id().to_owned(),
            vehicle: vehicles[v_rank].external_id().to_owned(),
        };

        let requirement = if job.is_pickup() {
            PinnedBoundaryRequirement::Shipment {
                pickup: rank,
                delivery: rank + 1,
            }
        } else {
            PinnedBoundaryRequirement::Single(rank)
        };

        match job.pinned_position() {
            PinnedPosition::First => {
                let head_ok = match requirement {
                    PinnedBoundaryRequirement::Single(r) => seeds.first() == Some(&r),
                    PinnedBoundaryRequirement::Shipment { pickup, delivery } => {
                        seeds.first() == Some(&pickup) && seeds.get(1) == Some(&delivery)
                    }
                };
                if !head_ok || first_by_vehicle[v_rank].is_some() {
                    return Err(mismatch());
                }
                first_by_vehicle[v_rank] = Some(requirement);
            }
            PinnedPosition::Last => {
                let tail_ok = match requirement {
                    PinnedBoundaryRequirement::Single(r) => seeds.last() == Some(&r),
                    PinnedBoundaryRequirement::Shipment { pickup, delivery } => {
                        seeds.len() >= 2
                            && seeds[seeds.len() - 2] == pickup
                            && seeds[seeds.len() - 1] == delivery
                    }
                };
                if !tail_ok || last_by_vehicle[v_rank].is_some() {
                    return Err(mismatch());
                }
                last_by_vehicle[v_rank] = Some(requirement);
            }
            PinnedPosition::None => unreachable!(),
        }
    }

    Ok((first_by_vehicle, last_by_vehicle))
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::problem::job::{JobBuilder, JobKind};
    use crate::problem::vehicle::VehicleBuilder;
    use crate::test_utils;

    #[test]
    fn test_build_resolves_pinned_metadata() {
        let problem = test_utils::ProblemFixture::new(4)
            .job(|j| {
                j.set_pinned(true);
                j.set_pinned_position(PinnedPosition::First);
            })
            .job(|_| {})
            .vehicle(|v| {
                v.set_steps(vec!["job_0".into(), "job_1".into()]);
            })
            .build();

        assert_eq!(problem.pinned_vehicle(0), Some(0));
        assert_eq!(problem.pinned_vehicle(1), None);
        assert_eq!(
            problem.pinned_first_for_vehicle(0),
            Some(PinnedBoundaryRequirement::Single(0))
        );
        assert_eq!(problem.pinned_last_for_vehicle(0), None);
        assert_eq!(problem.seeded_ranks(0), &[0, 1]);
    }

    #[test]
    fn test_pinned_job_must_be_seeded() {
        let result = test_utils::ProblemFixture::new(3)
            .job(|j| {
                j.set_pinned(true);
            })
            .vehicle(|_| {})
            .try_build();

        assert_eq!(
            result.unwrap_err(),
            ProblemError::PinnedJobNotSeeded {
                id: "job_0".to_owned()
            }
        );
    }

    #[test]
    fn test_pinned_job_seeded_twice_is_rejected() {
        let result = test_utils::ProblemFixture::new(3)
            .job(|j| {
                j.set_pinned(true);
            })
            .vehicle(|v| {
                v.set_steps(vec!["job_0".into()]);
            })
            .vehicle(|v| {
                v.set_steps(vec!["job_0".into()]);
            })
            .try_build();

        assert_eq!(
            result.unwrap_err(),
            ProblemError::PinnedJobSeededTwice {
                id: "job_0".to_owned()
            }
        );
    }

    #[test]
    fn test_pinned_vehicle_conflicting_with_allow_list() {
        let result = test_utils::ProblemFixture::new(3)
            .job(|j| {
                j.set_pinned(true);
                j.set_allowed_vehicles(vec!["vehicle_9".into()]);
            })
            .vehicle(|v| {
                v.set_steps(vec!["job_0".into()]);
            })
            .try_build();

        assert_eq!(
            result.unwrap_err(),
            ProblemError::PinnedVehicleNotAllowed {
                id: "job_0".to_owned(),
                vehicle: "vehicle_0".to_owned()
            }
        );
    }

    #[test]
    fn test_partially_pinned_shipment_is_rejected() {
        let mut builder = VehicleRoutingProblemBuilder::default();

        let mut pickup = JobBuilder::default();
        pickup.set_external_id("p_0");
        pickup.set_location_id(1);
        pickup.set_kind(JobKind::Pickup);
        pickup.set_pinned(true);
        let mut delivery = JobBuilder::default();
        delivery.set_external_id("d_0");
        delivery.set_location_id(2);
        delivery.set_kind(JobKind::Delivery);
        builder.add_shipment(pickup.build(), delivery.build());

        let mut vehicle = VehicleBuilder::default();
        vehicle.set_external_id("vehicle_0");
        vehicle.set_profile("car");
        vehicle.set_steps(vec!["p_0".into(), "d_0".into()]);
        builder.add_vehicle(vehicle.build());
        builder.set_matrix("car", test_utils::constant_matrix(3, 60));

        assert_eq!(
            builder.build().unwrap_err(),
            ProblemError::PartiallyPinnedShipment {
                id: "p_0".to_owned()
            }
        );
    }

    #[test]
    fn test_seeded_duplicate_tags_raise_limit() {
        let problem = test_utils::ProblemFixture::new(4)
            .job(|j| {
                j.add_exclusive_tag("fridge");
                j.set_pinned(true);
            })
            .job(|j| {
                j.add_exclusive_tag("fridge");
                j.set_pinned(true);
            })
            .job(|j| {
                j.add_exclusive_tag("fridge");
            })
            .vehicle(|v| {
                v.set_steps(vec!["job_0".into(), "job_1".into()]);
            })
            .vehicle(|_| {})
            .build();

        let tag = problem.exclusive_tag_ids(0)[0];
        assert_eq!(problem.exclusive_tag_ids(2), &[tag]);
        assert_eq!(problem.exclusive_tag_limit(0, tag), 2);
        assert_eq!(problem.exclusive_tag_limit(1, tag), 1);
    }

    #[test]
    fn test_amount_arity_mismatch() {
        let result = test_utils::ProblemFixture::new(3)
            .job(|j| {
                j.set_delivery(Amount::from_vec(vec![1, 2]));
            })
            .job(|j| {
                j.set_delivery(Amount::from_vec(vec![1]));
            })
            .vehicle(|_| {})
            .try_build();

        assert_eq!(
            result.unwrap_err(),
            ProblemError::AmountArity {
                id: "job_1".to_owned(),
                expected: 2,
                got: 1
            }
        );
    }

    #[test]
    fn test_eval_uses_hourly_rate_without_cost_matrix() {
        let problem = test_utils::ProblemFixture::new(2)
            .job(|_| {})
            .vehicle(|_| {})
            .build();

        let eval = problem.eval(0, 0, 1);
        assert_eq!(eval.duration, SignedDuration::from_secs(60));
        // Default hourly rate makes cost equal to seconds.
        assert_eq!(eval.cost, 60);
        assert_eq!(eval.distance, 60);
    }

    #[test]
    fn test_compatibility_folds_pinning_and_skills() {
        let problem = test_utils::ProblemFixture::new(4)
            .job(|j| {
                j.set_pinned(true);
            })
            .job(|j| {
                j.set_skills(vec!["frozen".into()]);
            })
            .vehicle(|v| {
                v.set_steps(vec!["job_0".into()]);
            })
            .vehicle(|v| {
                v.set_skills(vec!["frozen".into()]);
            })
            .build();

        // job_0 is pinned to vehicle_0.
        assert!(problem.vehicle_ok_with_job(0, 0));
        assert!(!problem.vehicle_ok_with_job(1, 0));
        // job_1 needs the frozen skill.
        assert!(!problem.vehicle_ok_with_job(0, 1));
        assert!(problem.vehicle_ok_with_job(1, 1));
    }
}
