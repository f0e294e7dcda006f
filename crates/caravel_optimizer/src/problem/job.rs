use fxhash::{FxHashMap, FxHashSet};
use jiff::SignedDuration;
use serde::Serialize;

use crate::problem::{
    amount::Amount,
    eval::Cost,
    time_window::{TimeWindow, TimeWindows},
};

/// Rank of a job in the problem's job table. A shipment's delivery always
/// sits at its pickup's rank + 1.
pub type JobRank = usize;
pub type LocationId = usize;
pub type Skill = String;
pub type ExclusiveTag = String;
pub type Priority = u32;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Single,
    Pickup,
    Delivery,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PinnedPosition {
    #[default]
    None,
    First,
    Last,
}

#[derive(Serialize, Debug, Clone)]
pub struct Job {
    external_id: String,
    location_id: LocationId,
    kind: JobKind,
    delivery: Amount,
    pickup: Amount,
    skills: FxHashSet<Skill>,
    priority: Priority,
    time_windows: TimeWindows,
    default_setup: SignedDuration,
    default_service: SignedDuration,
    setup_per_type: FxHashMap<String, SignedDuration>,
    service_per_type: FxHashMap<String, SignedDuration>,
    /// Objective-only penalties keyed by vehicle id, applied when this job is
    /// assigned to that vehicle. Shipments carry these on the pickup only.
    vehicle_penalties: Vec<(String, Cost)>,
    /// At most `limit` tasks per tag may share a route. Pickup-only for
    /// shipments.
    exclusive_tags: Vec<ExclusiveTag>,
    /// Monetary contribution toward the route budget. Pickup-only for
    /// shipments.
    budget: Cost,
    pinned: bool,
    pinned_position: PinnedPosition,
    allowed_vehicles: Vec<String>,

    // Indexed by vehicle type rank, filled during problem build.
    pub(crate) setups: Vec<SignedDuration>,
    pub(crate) services: Vec<SignedDuration>,
}

impl Job {
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn location_id(&self) -> LocationId {
        self.location_id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn is_single(&self) -> bool {
        self.kind == JobKind::Single
    }

    pub fn is_pickup(&self) -> bool {
        self.kind == JobKind::Pickup
    }

    pub fn is_delivery(&self) -> bool {
        self.kind == JobKind::Delivery
    }

    pub fn delivery(&self) -> &Amount {
        &self.delivery
    }

    pub fn pickup(&self) -> &Amount {
        &self.pickup
    }

    pub fn skills(&self) -> &FxHashSet<Skill> {
        &self.skills
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn time_windows(&self) -> &TimeWindows {
        &self.time_windows
    }

    pub fn budget(&self) -> Cost {
        self.budget
    }

    pub fn pinned(&self) -> bool {
        self.pinned
    }

    pub fn pinned_position(&self) -> PinnedPosition {
        self.pinned_position
    }

    pub fn allowed_vehicles(&self) -> &[String] {
        &self.allowed_vehicles
    }

    pub fn exclusive_tags(&self) -> &[ExclusiveTag] {
        &self.exclusive_tags
    }

    pub fn vehicle_penalties(&self) -> &[(String, Cost)] {
        &self.vehicle_penalties
    }

    pub(crate) fn setup_per_type(&self) -> &FxHashMap<String, SignedDuration> {
        &self.setup_per_type
    }

    pub(crate) fn service_per_type(&self) -> &FxHashMap<String, SignedDuration> {
        &self.service_per_type
    }

    pub(crate) fn default_setup(&self) -> SignedDuration {
        self.default_setup
    }

    pub(crate) fn default_service(&self) -> SignedDuration {
        self.default_service
    }

    pub fn setup(&self, type_rank: usize) -> SignedDuration {
        self.setups[type_rank]
    }

    pub fn service(&self, type_rank: usize) -> SignedDuration {
        self.services[type_rank]
    }

    /// Setup plus service for the given vehicle type, with setup suppressed
    /// when the previous stop shares this job's location.
    pub fn action_time(
        &self,
        type_rank: usize,
        previous_location: Option<LocationId>,
    ) -> SignedDuration {
        if previous_location == Some(self.location_id) {
            self.services[type_rank]
        } else {
            self.setups[type_rank] + self.services[type_rank]
        }
    }
}

#[derive(Default)]
pub struct JobBuilder {
    external_id: Option<String>,
    location_id: Option<LocationId>,
    kind: Option<JobKind>,
    delivery: Option<Amount>,
    pickup: Option<Amount>,
    skills: Option<Vec<Skill>>,
    priority: Option<Priority>,
    time_windows: Option<Vec<TimeWindow>>,
    default_setup: Option<SignedDuration>,
    default_service: Option<SignedDuration>,
    setup_per_type: FxHashMap<String, SignedDuration>,
    service_per_type: FxHashMap<String, SignedDuration>,
    vehicle_penalties: Vec<(String, Cost)>,
    exclusive_tags: Vec<ExclusiveTag>,
    budget: Option<Cost>,
    pinned: Option<bool>,
    pinned_position: Option<PinnedPosition>,
    allowed_vehicles: Vec<String>,
}

impl JobBuilder {
    pub fn set_external_id(&mut self, external_id: impl Into<String>) -> &mut JobBuilder {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn set_location_id(&mut self, location_id: LocationId) -> &mut JobBuilder {
        self.location_id = Some(location_id);
        self
    }

    pub fn set_kind(&mut self, kind: JobKind) -> &mut JobBuilder {
        self.kind = Some(kind);
        self
    }

    pub fn set_delivery(&mut self, delivery: Amount) -> &mut JobBuilder {
        self.delivery = Some(delivery);
        self
    }

    pub fn set_pickup(&mut self, pickup: Amount) -> &mut JobBuilder {
        self.pickup = Some(pickup);
        self
    }

    /// Shipment convenience: the moved amount is a pickup on the pickup half
    /// and a delivery on the delivery half.
    pub fn set_amount(&mut self, amount: Amount) -> &mut JobBuilder {
        match self.kind {
            Some(JobKind::Pickup) => self.pickup = Some(amount),
            Some(JobKind::Delivery) => self.delivery = Some(amount),
            _ => panic!("set_amount requires the shipment kind to be set first"),
        }
        self
    }

    pub fn set_skills(&mut self, skills: Vec<Skill>) -> &mut JobBuilder {
        self.skills = Some(skills);
        self
    }

    pub fn set_priority(&mut self, priority: Priority) -> &mut JobBuilder {
        self.priority = Some(priority);
        self
    }

    pub fn set_time_window(&mut self, time_window: TimeWindow) -> &mut JobBuilder {
        self.time_windows
            .get_or_insert_with(Vec::new)
            .push(time_window);
        self
    }

    pub fn set_time_windows(&mut self, time_windows: Vec<TimeWindow>) -> &mut JobBuilder {
        self.time_windows = Some(time_windows);
        self
    }

    pub fn set_setup(&mut self, setup: SignedDuration) -> &mut JobBuilder {
        self.default_setup = Some(setup);
        self
    }

    pub fn set_service(&mut self, service: SignedDuration) -> &mut JobBuilder {
        self.default_service = Some(service);
        self
    }

    pub fn set_setup_for_type(
        &mut self,
        vehicle_type: impl Into<String>,
        setup: SignedDuration,
    ) -> &mut JobBuilder {
        self.setup_per_type.insert(vehicle_type.into(), setup);
        self
    }

    pub fn set_service_for_type(
        &mut self,
        vehicle_type: impl Into<String>,
        service: SignedDuration,
    ) -> &mut JobBuilder {
        self.service_per_type.insert(vehicle_type.into(), service);
        self
    }

    pub fn add_vehicle_penalty(
        &mut self,
        vehicle_id: impl Into<String>,
        penalty: Cost,
    ) -> &mut JobBuilder {
        self.vehicle_penalties.push((vehicle_id.into(), penalty));
        self
    }

    pub fn add_exclusive_tag(&mut self, tag: impl Into<ExclusiveTag>) -> &mut JobBuilder {
        self.exclusive_tags.push(tag.into());
        self
    }

    pub fn set_budget(&mut self, budget: Cost) -> &mut JobBuilder {
        self.budget = Some(budget);
        self
    }

    pub fn set_pinned(&mut self, pinned: bool) -> &mut JobBuilder {
        self.pinned = Some(pinned);
        self
    }

    pub fn set_pinned_position(&mut self, pinned_position: PinnedPosition) -> &mut JobBuilder {
        self.pinned_position = Some(pinned_position);
        self
    }

    pub fn set_allowed_vehicles(&mut self, allowed_vehicles: Vec<String>) -> &mut JobBuilder {
        self.allowed_vehicles = allowed_vehicles;
        self
    }

    pub fn build(self) -> Job {
        Job {
            external_id: self.external_id.expect("job external id is required"),
            location_id: self.location_id.expect("job location is required"),
            kind: self.kind.unwrap_or(JobKind::Single),
            delivery: self.delivery.unwrap_or_default(),
            pickup: self.pickup.unwrap_or_default(),
            skills: FxHashSet::from_iter(self.skills.unwrap_or_default()),
            priority: self.priority.unwrap_or(0),
            time_windows: TimeWindows::from_vec(self.time_windows.unwrap_or_default()),
            default_setup: self.default_setup.unwrap_or(SignedDuration::ZERO),
            default_service: self.default_service.unwrap_or(SignedDuration::ZERO),
            setup_per_type: self.setup_per_type,
            service_per_type: self.service_per_type,
            vehicle_penalties: self.vehicle_penalties,
            exclusive_tags: self.exclusive_tags,
            budget: self.budget.unwrap_or(0),
            pinned: self.pinned.unwrap_or(false),
            pinned_position: self.pinned_position.unwrap_or_default(),
            allowed_vehicles: self.allowed_vehicles,
            setups: Vec::new(),
            services: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_builder_defaults() {
        let mut builder = JobBuilder::default();
        builder.set_external_id("job_1");
        builder.set_location_id(3);
        let job = builder.build();

        assert_eq!(job.external_id(), "job_1");
        assert_eq!(job.kind(), JobKind::Single);
        assert!(job.delivery().is_empty());
        assert!(!job.pinned());
        assert_eq!(job.pinned_position(), PinnedPosition::None);
        assert_eq!(job.budget(), 0);
        // An unconstrained job still gets the full time window.
        assert_eq!(job.time_windows().len(), 1);
    }

    #[test]
    fn test_action_time_suppresses_setup_on_same_location() {
        let mut builder = JobBuilder::default();
        builder.set_external_id("job_1");
        builder.set_location_id(3);
        builder.set_setup(SignedDuration::from_mins(5));
        builder.set_service(SignedDuration::from_mins(10));
        let mut job = builder.build();
        job.setups = vec![SignedDuration::from_mins(5)];
        job.services = vec![SignedDuration::from_mins(10)];

        assert_eq!(job.action_time(0, None), SignedDuration::from_mins(15));
        assert_eq!(job.action_time(0, Some(2)), SignedDuration::from_mins(15));
        assert_eq!(job.action_time(0, Some(3)), SignedDuration::from_mins(10));
    }

    #[test]
    fn test_shipment_amount_follows_kind() {
        let mut builder = JobBuilder::default();
        builder.set_external_id("p_1");
        builder.set_location_id(0);
        builder.set_kind(JobKind::Pickup);
        builder.set_amount(Amount::from_vec(vec![4]));
        let pickup = builder.build();

        assert_eq!(pickup.pickup(), &Amount::from_vec(vec![4]));
        assert!(pickup.delivery().is_empty());
    }
}
