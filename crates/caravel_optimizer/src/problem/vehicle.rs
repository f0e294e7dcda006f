use fxhash::FxHashSet;
use jiff::SignedDuration;
use serde::Serialize;

use crate::problem::{
    amount::{is_capacity_satisfied, Amount},
    eval::{Cost, Distance},
    job::{LocationId, Skill},
    time_window::{TimeWindow, TimeWindows},
};

pub type VehicleRank = usize;

/// Cost per hour that makes internal travel cost equal to travel duration in
/// seconds when no explicit cost matrix is provided.
pub const DEFAULT_COST_PER_HOUR: Cost = 3600;

/// Mandatory rest event with its own windows and an optional cap on the load
/// the vehicle may carry while resting.
#[derive(Serialize, Debug, Clone)]
pub struct VehicleBreak {
    external_id: String,
    time_windows: TimeWindows,
    service: SignedDuration,
    max_load: Option<Amount>,
}

impl VehicleBreak {
    pub fn new(
        external_id: impl Into<String>,
        time_windows: Vec<TimeWindow>,
        service: SignedDuration,
        max_load: Option<Amount>,
    ) -> Self {
        VehicleBreak {
            external_id: external_id.into(),
            time_windows: TimeWindows::from_vec(time_windows),
            service,
            max_load,
        }
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn time_windows(&self) -> &TimeWindows {
        &self.time_windows
    }

    pub fn service(&self) -> SignedDuration {
        self.service
    }

    pub fn max_load(&self) -> Option<&Amount> {
        self.max_load.as_ref()
    }

    pub fn is_valid_for_load(&self, load: &Amount) -> bool {
        match &self.max_load {
            Some(max_load) => is_capacity_satisfied(max_load, load),
            None => true,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct Vehicle {
    external_id: String,
    profile: String,
    vehicle_type: String,
    capacity: Amount,
    start_location: Option<LocationId>,
    end_location: Option<LocationId>,
    time_window: TimeWindow,
    breaks: Vec<VehicleBreak>,
    cost_per_hour: Cost,
    fixed_cost: Cost,
    max_first_leg_distance: Option<Distance>,
    /// Seeded route as job ids. Binds pinned tasks to this vehicle.
    steps: Vec<String>,
    skills: FxHashSet<Skill>,

    // Filled during problem build.
    pub(crate) type_rank: usize,
    pub(crate) has_break_max_load: bool,
}

impl Vehicle {
    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn vehicle_type(&self) -> &str {
        &self.vehicle_type
    }

    pub fn type_rank(&self) -> usize {
        self.type_rank
    }

    pub fn capacity(&self) -> &Amount {
        &self.capacity
    }

    pub fn has_start(&self) -> bool {
        self.start_location.is_some()
    }

    pub fn has_end(&self) -> bool {
        self.end_location.is_some()
    }

    pub fn start_location(&self) -> Option<LocationId> {
        self.start_location
    }

    pub fn end_location(&self) -> Option<LocationId> {
        self.end_location
    }

    pub fn time_window(&self) -> &TimeWindow {
        &self.time_window
    }

    pub fn breaks(&self) -> &[VehicleBreak] {
        &self.breaks
    }

    pub fn has_break_max_load(&self) -> bool {
        self.has_break_max_load
    }

    pub fn cost_per_hour(&self) -> Cost {
        self.cost_per_hour
    }

    pub fn fixed_cost(&self) -> Cost {
        self.fixed_cost
    }

    pub fn max_first_leg_distance(&self) -> Option<Distance> {
        self.max_first_leg_distance
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    pub fn skills(&self) -> &FxHashSet<Skill> {
        &self.skills
    }

    /// Duration-proportional cost used for fallback travel cost and for
    /// pricing action time into route budgets.
    pub fn cost_from_duration(&self, duration: SignedDuration) -> Cost {
        if duration.is_zero() {
            return 0;
        }
        self.cost_per_hour.saturating_mul(duration.as_secs()) / 3600
    }
}

#[derive(Default)]
pub struct VehicleBuilder {
    external_id: Option<String>,
    profile: Option<String>,
    vehicle_type: Option<String>,
    capacity: Option<Amount>,
    start_location: Option<LocationId>,
    end_location: Option<LocationId>,
    time_window: Option<TimeWindow>,
    breaks: Vec<VehicleBreak>,
    cost_per_hour: Option<Cost>,
    fixed_cost: Option<Cost>,
    max_first_leg_distance: Option<Distance>,
    steps: Vec<String>,
    skills: Option<Vec<Skill>>,
}

impl VehicleBuilder {
    pub fn set_external_id(&mut self, external_id: impl Into<String>) -> &mut VehicleBuilder {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn set_profile(&mut self, profile: impl Into<String>) -> &mut VehicleBuilder {
        self.profile = Some(profile.into());
        self
    }

    pub fn set_vehicle_type(&mut self, vehicle_type: impl Into<String>) -> &mut VehicleBuilder {
        self.vehicle_type = Some(vehicle_type.into());
        self
    }

    pub fn set_capacity(&mut self, capacity: Amount) -> &mut VehicleBuilder {
        self.capacity = Some(capacity);
        self
    }

    pub fn set_start_location(&mut self, start_location: LocationId) -> &mut VehicleBuilder {
        self.start_location = Some(start_location);
        self
    }

    pub fn set_end_location(&mut self, end_location: LocationId) -> &mut VehicleBuilder {
        self.end_location = Some(end_location);
        self
    }

    pub fn set_time_window(&mut self, time_window: TimeWindow) -> &mut VehicleBuilder {
        self.time_window = Some(time_window);
        self
    }

    pub fn add_break(&mut self, vehicle_break: VehicleBreak) -> &mut VehicleBuilder {
        self.breaks.push(vehicle_break);
        self
    }

    pub fn set_cost_per_hour(&mut self, cost_per_hour: Cost) -> &mut VehicleBuilder {
        self.cost_per_hour = Some(cost_per_hour);
        self
    }

    pub fn set_fixed_cost(&mut self, fixed_cost: Cost) -> &mut VehicleBuilder {
        self.fixed_cost = Some(fixed_cost);
        self
    }

    pub fn set_max_first_leg_distance(&mut self, distance: Distance) -> &mut VehicleBuilder {
        self.max_first_leg_distance = Some(distance);
        self
    }

    pub fn set_steps(&mut self, steps: Vec<String>) -> &mut VehicleBuilder {
        self.steps = steps;
        self
    }

    pub fn set_skills(&mut self, skills: Vec<Skill>) -> &mut VehicleBuilder {
        self.skills = Some(skills);
        self
    }

    pub fn build(self) -> Vehicle {
        let breaks = self.breaks;
        let has_break_max_load = breaks.iter().any(|b| b.max_load.is_some());

        Vehicle {
            external_id: self.external_id.expect("vehicle external id is required"),
            profile: self.profile.expect("vehicle profile is required"),
            vehicle_type: self.vehicle_type.unwrap_or_default(),
            capacity: self.capacity.unwrap_or_default(),
            start_location: self.start_location,
            end_location: self.end_location,
            time_window: self.time_window.unwrap_or_default(),
            breaks,
            cost_per_hour: self.cost_per_hour.unwrap_or(DEFAULT_COST_PER_HOUR),
            fixed_cost: self.fixed_cost.unwrap_or(0),
            max_first_leg_distance: self.max_first_leg_distance,
            steps: self.steps,
            skills: FxHashSet::from_iter(self.skills.unwrap_or_default()),
            type_rank: 0,
            has_break_max_load,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_break_load_cap() {
        let b = VehicleBreak::new(
            "break_1",
            vec![],
            SignedDuration::from_mins(30),
            Some(Amount::from_vec(vec![5])),
        );

        assert!(b.is_valid_for_load(&Amount::from_vec(vec![5])));
        assert!(!b.is_valid_for_load(&Amount::from_vec(vec![6])));

        let unbounded = VehicleBreak::new("break_2", vec![], SignedDuration::ZERO, None);
        assert!(unbounded.is_valid_for_load(&Amount::from_vec(vec![i64::MAX])));
    }

    #[test]
    fn test_cost_from_duration_defaults_to_seconds() {
        let mut builder = VehicleBuilder::default();
        builder.set_external_id("vehicle_1");
        builder.set_profile("car");
        let vehicle = builder.build();

        assert_eq!(
            vehicle.cost_from_duration(SignedDuration::from_secs(100)),
            100
        );
        assert_eq!(vehicle.cost_from_duration(SignedDuration::ZERO), 0);
    }

    #[test]
    fn test_builder() {
        let mut builder = VehicleBuilder::default();
        builder.set_external_id("vehicle_1");
        builder.set_profile("car");
        builder.set_capacity(Amount::from_vec(vec![10]));
        builder.set_start_location(0);
        builder.add_break(VehicleBreak::new(
            "break_1",
            vec![],
            SignedDuration::from_mins(30),
            Some(Amount::from_vec(vec![2])),
        ));
        let vehicle = builder.build();

        assert!(vehicle.has_start());
        assert!(!vehicle.has_end());
        assert!(vehicle.has_break_max_load());
        assert_eq!(vehicle.cost_per_hour(), DEFAULT_COST_PER_HOUR);
    }
}
