//! Online prediction service: `POST /predict` plus health, readiness,
//! metrics and model availability endpoints.

pub mod api;
pub mod config;
