use thiserror::Error;

/// Loader-time infeasibility. Everything here maps to a validation failure
/// surfaced before the solve starts (exit code 2 at the CLI level).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProblemError {
    #[error("inconsistent amount arity: expected {expected}, got {got} for {id}")]
    AmountArity {
        id: String,
        expected: usize,
        got: usize,
    },

    #[error("unknown routing profile {profile} for vehicle {vehicle}")]
    UnknownProfile { profile: String, vehicle: String },

    #[error("unknown job id {id} in steps of vehicle {vehicle}")]
    UnknownStepJob { id: String, vehicle: String },

    #[error("unknown vehicle id {id} referenced by job {job}")]
    UnknownVehicle { id: String, job: String },

    #[error("pinned job {id} is not present in any vehicle's steps")]
    PinnedJobNotSeeded { id: String },

    #[error("pinned job {id} is seeded on more than one vehicle")]
    PinnedJobSeededTwice { id: String },

    #[error("pinned job {id} is bound to vehicle {vehicle} but that vehicle is not allowed")]
    PinnedVehicleNotAllowed { id: String, vehicle: String },

    #[error("shipment pickup {id} and its delivery disagree on pinning")]
    PartiallyPinnedShipment { id: String },

    #[error("pinned position of job {id} does not match the seeded steps of vehicle {vehicle}")]
    PinnedPositionMismatch { id: String, vehicle: String },

    #[error("shipment delivery {id} must not carry tags, budget or penalties")]
    InvalidShipmentDelivery { id: String },

    #[error("shipment pickup at rank {pickup_rank} is not followed by its delivery")]
    BrokenShipmentAdjacency { pickup_rank: usize },

    #[error("inconsistent breaks for vehicle {vehicle}")]
    InconsistentBreaks { vehicle: String },

    #[error("invalid timestamp {value} on {id}")]
    InvalidTimestamp { id: String, value: String },
}
