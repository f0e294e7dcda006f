use std::collections::HashMap;

use jiff::{SignedDuration, Timestamp};
use schemars::JsonSchema;
use serde::Deserialize;

use crate::problem::{
    amount::Amount,
    error::ProblemError,
    eval::Cost,
    job::{JobBuilder, JobKind, PinnedPosition},
    time_window::TimeWindow,
    travel_cost_matrix::TravelMatrices,
    vehicle::{VehicleBreak, VehicleBuilder},
    vehicle_routing_problem::{VehicleRoutingProblem, VehicleRoutingProblemBuilder},
};

/// Typed form of the solver input. Durations are plain seconds, instants are
/// ISO 8601 strings.
#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename = "VehicleRoutingProblem")]
pub struct JsonVehicleRoutingProblem {
    #[serde(default)]
    pub jobs: Vec<JsonJob>,
    #[serde(default)]
    pub shipments: Vec<JsonShipment>,
    pub vehicles: Vec<JsonVehicle>,
    /// Travel matrices keyed by routing profile.
    pub matrices: HashMap<String, JsonMatrices>,

    #[serde(default)]
    pub pinned_soft_timing: bool,
    #[serde(default)]
    pub pinned_lateness_limit_sec: i64,
    #[serde(default)]
    pub include_action_time_in_budget: bool,
    pub budget_densify_candidates_k: Option<u32>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename = "TimeWindow")]
pub struct JsonTimeWindow {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename = "Job")]
pub struct JsonJob {
    pub id: String,
    pub location_id: usize,
    pub delivery: Option<Vec<i64>>,
    pub pickup: Option<Vec<i64>>,
    pub skills: Option<Vec<String>>,
    pub priority: Option<u32>,
    pub time_windows: Option<Vec<JsonTimeWindow>>,
    pub setup_sec: Option<i64>,
    pub service_sec: Option<i64>,
    pub setup_sec_per_type: Option<HashMap<String, i64>>,
    pub service_sec_per_type: Option<HashMap<String, i64>>,
    pub vehicle_penalties: Option<Vec<JsonVehiclePenalty>>,
    pub exclusive_tags: Option<Vec<String>>,
    pub budget: Option<Cost>,
    #[serde(default)]
    pub pinned: bool,
    pub pinned_position: Option<JsonPinnedPosition>,
    pub allowed_vehicles: Option<Vec<String>>,
}

#[derive(Deserialize, JsonSchema, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum JsonPinnedPosition {
    First,
    Last,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename = "VehiclePenalty")]
pub struct JsonVehiclePenalty {
    pub vehicle: String,
    pub penalty: Cost,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename = "ShipmentTask")]
pub struct JsonShipmentTask {
    pub id: String,
    pub location_id: usize,
    pub setup_sec: Option<i64>,
    pub service_sec: Option<i64>,
    pub time_windows: Option<Vec<JsonTimeWindow>>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename = "Shipment")]
pub struct JsonShipment {
    pub pickup: JsonShipmentTask,
    pub delivery: JsonShipmentTask,
    pub amount: Option<Vec<i64>>,
    pub skills: Option<Vec<String>>,
    pub priority: Option<u32>,
    /// Tags, budget and penalties live on the pickup half.
    pub exclusive_tags: Option<Vec<String>>,
    pub budget: Option<Cost>,
    pub vehicle_penalties: Option<Vec<JsonVehiclePenalty>>,
    #[serde(default)]
    pub pinned: bool,
    pub pinned_position: Option<JsonPinnedPosition>,
    pub allowed_vehicles: Option<Vec<String>>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename = "Break")]
pub struct JsonBreak {
    pub id: String,
    pub time_windows: Option<Vec<JsonTimeWindow>>,
    pub service_sec: Option<i64>,
    pub max_load: Option<Vec<i64>>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename = "Vehicle")]
pub struct JsonVehicle {
    pub id: String,
    pub profile: String,
    pub vehicle_type: Option<String>,
    pub capacity: Option<Vec<i64>>,
    pub start_location_id: Option<usize>,
    pub end_location_id: Option<usize>,
    pub time_window: Option<JsonTimeWindow>,
    pub breaks: Option<Vec<JsonBreak>>,
    pub cost_per_hour: Option<Cost>,
    pub fixed_cost: Option<Cost>,
    pub max_first_leg_distance: Option<i64>,
    /// Seeded route as job ids; binds pinned tasks to this vehicle.
    pub steps: Option<Vec<String>>,
    pub skills: Option<Vec<String>>,
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename = "Matrices")]
pub struct JsonMatrices {
    pub durations: Vec<Vec<i64>>,
    pub distances: Option<Vec<Vec<i64>>>,
    pub costs: Option<Vec<Vec<i64>>>,
}

fn parse_timestamp(id: &str, value: &str) -> Result<Timestamp, ProblemError> {
    value.parse().map_err(|_| ProblemError::InvalidTimestamp {
        id: id.to_owned(),
        value: value.to_owned(),
    })
}

fn convert_time_windows(
    id: &str,
    time_windows: Option<Vec<JsonTimeWindow>>,
) -> Result<Vec<TimeWindow>, ProblemError> {
    time_windows
        .unwrap_or_default()
        .into_iter()
        .map(|tw| {
            let start = tw
                .start
                .as_deref()
                .map(|s| parse_timestamp(id, s))
                .transpose()?;
            let end = tw
                .end
                .as_deref()
                .map(|e| parse_timestamp(id, e))
                .transpose()?;
            Ok(TimeWindow::new(start, end))
        })
        .collect()
}

fn convert_pinned_position(position: Option<JsonPinnedPosition>) -> PinnedPosition {
    match position {
        Some(JsonPinnedPosition::First) => PinnedPosition::First,
        Some(JsonPinnedPosition::Last) => PinnedPosition::Last,
        None => PinnedPosition::None,
    }
}

impl JsonJob {
    fn into_builder(self) -> Result<JobBuilder, ProblemError> {
        let mut builder = JobBuilder::default();
        builder.set_location_id(self.location_id);
        if let Some(delivery) = self.delivery {
            builder.set_delivery(Amount::from_vec(delivery));
        }
        if let Some(pickup) = self.pickup {
            builder.set_pickup(Amount::from_vec(pickup));
        }
        if let Some(skills) = self.skills {
            builder.set_skills(skills);
        }
        if let Some(priority) = self.priority {
            builder.set_priority(priority);
        }
        builder.set_time_windows(convert_time_windows(&self.id, self.time_windows)?);
        if let Some(setup) = self.setup_sec {
            builder.set_setup(SignedDuration::from_secs(setup));
        }
        if let Some(service) = self.service_sec {
            builder.set_service(SignedDuration::from_secs(service));
        }
        for (vehicle_type, setup) in self.setup_sec_per_type.unwrap_or_default() {
            builder.set_setup_for_type(vehicle_type, SignedDuration::from_secs(setup));
        }
        for (vehicle_type, service) in self.service_sec_per_type.unwrap_or_default() {
            builder.set_service_for_type(vehicle_type, SignedDuration::from_secs(service));
        }
        for penalty in self.vehicle_penalties.unwrap_or_default() {
            builder.add_vehicle_penalty(penalty.vehicle, penalty.penalty);
        }
        for tag in self.exclusive_tags.unwrap_or_default() {
            builder.add_exclusive_tag(tag);
        }
        if let Some(budget) = self.budget {
            builder.set_budget(budget);
        }
        builder.set_pinned(self.pinned);
        builder.set_pinned_position(convert_pinned_position(self.pinned_position));
        if let Some(allowed) = self.allowed_vehicles {
            builder.set_allowed_vehicles(allowed);
        }
        builder.set_external_id(self.id);
        Ok(builder)
    }
}

impl JsonShipmentTask {
    fn into_builder(self, kind: JobKind) -> Result<JobBuilder, ProblemError> {
        let mut builder = JobBuilder::default();
        builder.set_kind(kind);
        builder.set_location_id(self.location_id);
        builder.set_time_windows(convert_time_windows(&self.id, self.time_windows)?);
        if let Some(setup) = self.setup_sec {
            builder.set_setup(SignedDuration::from_secs(setup));
        }
        if let Some(service) = self.service_sec {
            builder.set_service(SignedDuration::from_secs(service));
        }
        builder.set_external_id(self.id);
        Ok(builder)
    }
}

impl JsonVehicleRoutingProblem {
    pub fn build_problem(self) -> Result<VehicleRoutingProblem, ProblemError> {
        let mut builder = VehicleRoutingProblemBuilder::default();

        for job in self.jobs {
            builder.add_job(job.into_builder()?.build());
        }

        for shipment in self.shipments {
            let amount = Amount::from_vec(shipment.amount.unwrap_or_default());

            let mut pickup = shipment.pickup.into_builder(JobKind::Pickup)?;
            pickup.set_pickup(amount.clone());
            if let Some(skills) = shipment.skills.clone() {
                pickup.set_skills(skills);
            }
            if let Some(priority) = shipment.priority {
                pickup.set_priority(priority);
            }
            for tag in shipment.exclusive_tags.unwrap_or_default() {
                pickup.add_exclusive_tag(tag);
            }
            if let Some(budget) = shipment.budget {
                pickup.set_budget(budget);
            }
            for penalty in shipment.vehicle_penalties.unwrap_or_default() {
                pickup.add_vehicle_penalty(penalty.vehicle, penalty.penalty);
            }
            pickup.set_pinned(shipment.pinned);
            pickup.set_pinned_position(convert_pinned_position(shipment.pinned_position));
            if let Some(allowed) = shipment.allowed_vehicles.clone() {
                pickup.set_allowed_vehicles(allowed);
            }

            let mut delivery = shipment.delivery.into_builder(JobKind::Delivery)?;
            delivery.set_delivery(amount);
            if let Some(skills) = shipment.skills {
                delivery.set_skills(skills);
            }
            if let Some(priority) = shipment.priority {
                delivery.set_priority(priority);
            }
            delivery.set_pinned(shipment.pinned);
            if let Some(allowed) = shipment.allowed_vehicles {
                delivery.set_allowed_vehicles(allowed);
            }

            builder.add_shipment(pickup.build(), delivery.build());
        }

        for vehicle in self.vehicles {
            let mut vehicle_builder = VehicleBuilder::default();
            vehicle_builder.set_profile(vehicle.profile);
            if let Some(vehicle_type) = vehicle.vehicle_type {
                vehicle_builder.set_vehicle_type(vehicle_type);
            }
            if let Some(capacity) = vehicle.capacity {
                vehicle_builder.set_capacity(Amount::from_vec(capacity));
            }
            if let Some(start) = vehicle.start_location_id {
                vehicle_builder.set_start_location(start);
            }
            if let Some(end) = vehicle.end_location_id {
                vehicle_builder.set_end_location(end);
            }
            if let Some(tw) = vehicle.time_window {
                let start = tw
                    .start
                    .as_deref()
                    .map(|s| parse_timestamp(&vehicle.id, s))
                    .transpose()?;
                let end = tw
                    .end
                    .as_deref()
                    .map(|e| parse_timestamp(&vehicle.id, e))
                    .transpose()?;
                vehicle_builder.set_time_window(TimeWindow::new(start, end));
            }
            for b in vehicle.breaks.unwrap_or_default() {
                let time_windows = convert_time_windows(&b.id, b.time_windows)?;
                vehicle_builder.add_break(VehicleBreak::new(
                    b.id,
                    time_windows,
                    SignedDuration::from_secs(b.service_sec.unwrap_or(0)),
                    b.max_load.map(Amount::from_vec),
                ));
            }
            if let Some(cost_per_hour) = vehicle.cost_per_hour {
                vehicle_builder.set_cost_per_hour(cost_per_hour);
            }
            if let Some(fixed_cost) = vehicle.fixed_cost {
                vehicle_builder.set_fixed_cost(fixed_cost);
            }
            if let Some(distance) = vehicle.max_first_leg_distance {
                vehicle_builder.set_max_first_leg_distance(distance);
            }
            if let Some(steps) = vehicle.steps {
                vehicle_builder.set_steps(steps);
            }
            if let Some(skills) = vehicle.skills {
                vehicle_builder.set_skills(skills);
            }
            vehicle_builder.set_external_id(vehicle.id);
            builder.add_vehicle(vehicle_builder.build());
        }

        for (profile, matrices) in self.matrices {
            let durations = matrices.durations;
            let distances = matrices.distances.unwrap_or_else(|| durations.clone());
            builder.set_matrix(profile, TravelMatrices::new(durations, distances, matrices.costs));
        }

        builder.set_pinned_soft_timing(self.pinned_soft_timing);
        builder.set_pinned_violation_budget(SignedDuration::from_secs(
            self.pinned_lateness_limit_sec,
        ));
        builder.set_include_action_time_in_budget(self.include_action_time_in_budget);
        if let Some(k) = self.budget_densify_candidates_k {
            builder.set_budget_densify_candidates_k(k);
        }

        builder.build()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn test_build_problem_from_json() {
        let input = serde_json::json!({
            "jobs": [
                {
                    "id": "j1",
                    "location_id": 1,
                    "delivery": [2],
                    "budget": 100,
                    "pinned": true,
                    "pinned_position": "first",
                    "exclusive_tags": ["fridge"],
                    "vehicle_penalties": [{"vehicle": "v1", "penalty": -10}]
                }
            ],
            "shipments": [
                {
                    "pickup": {"id": "p1", "location_id": 2, "service_sec": 60},
                    "delivery": {"id": "d1", "location_id": 3},
                    "amount": [1]
                }
            ],
            "vehicles": [
                {
                    "id": "v1",
                    "profile": "car",
                    "capacity": [10],
                    "start_location_id": 0,
                    "end_location_id": 0,
                    "steps": ["j1"],
                    "max_first_leg_distance": 500,
                    "breaks": [
                        {"id": "b1", "service_sec": 300, "max_load": [5]}
                    ]
                }
            ],
            "matrices": {
                "car": {"durations": [[0, 60, 60, 60], [60, 0, 60, 60], [60, 60, 0, 60], [60, 60, 60, 0]]}
            },
            "pinned_soft_timing": true,
            "pinned_lateness_limit_sec": 5
        });

        let parsed: JsonVehicleRoutingProblem = serde_json::from_value(input).unwrap();
        let problem = parsed.build_problem().unwrap();

        assert_eq!(problem.jobs().len(), 3);
        assert_eq!(problem.vehicles().len(), 1);
        assert!(problem.pinned_soft_timing());
        assert_eq!(
            problem.pinned_violation_budget(),
            SignedDuration::from_secs(5)
        );
        assert_eq!(problem.pinned_vehicle(0), Some(0));
        assert_eq!(problem.job_vehicle_penalty(0, 0), -10);
        assert_eq!(problem.vehicle(0).max_first_leg_distance(), Some(500));
        assert_eq!(problem.job(0).budget(), 100);
        assert!(problem.vehicle(0).has_break_max_load());
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let input = serde_json::json!({
            "vehicles": [],
            "matrices": {},
            "definitely_not_a_key": true
        });

        assert!(serde_json::from_value::<JsonVehicleRoutingProblem>(input).is_err());
    }
}
