//! A stand-in for the vendor health tracking service, for hosts without the
//! vendor SDK and for tests.

pub mod health_service;

pub use health_service::{synthesize_data_point, SimulatedHealthService, SimulatedTracker};
