//! API handlers for the careergate auth service.

pub mod auth;
pub mod health;
