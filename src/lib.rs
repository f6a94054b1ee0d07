//! Image keyword service
//!
//! Accepts uploaded images, derives keywords for them with an external
//! tagging service, then finds and downloads related images. The work runs
//! through a job queue so uploads return immediately and callers poll the
//! job status.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod telemetry;
