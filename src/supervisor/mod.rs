//! Supervisor / self-registration (C8): the admin HTTP surface and
//! optional Consul self-registration.

pub mod consul;
pub mod health;

pub use health::{router, AppState};
