//! Proxyfleet - Proxy Fleet Orchestration Engine
//!
//! Keeps a fleet of proxy servers healthy and hands subscribers the right
//! server at the right time.
//!
//! ## Components
//!
//! - Health monitoring with threshold-based status transitions and remediation
//! - Load balancing (round robin, least connections, ip hash, performance,
//!   weighted, geographic) with sticky sessions and failover
//! - Time, request and error driven rotation
//! - Minute/hour/day performance windows, scores and latency forecasts
//! - Versioned per-subscriber policies
//! - Vendor panel gateways behind rate limits and deadlines

pub mod analytics;
pub mod api;
pub mod balancer;
pub mod clock;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod fleet;
pub mod gateway;
pub mod health;
pub mod models;
pub mod repository;
pub mod rotation;
pub mod services;
pub mod store;

pub use config::Config;
pub use database::Database;
pub use engine::{EngineDeps, FleetEngine};
pub use error::{FleetError, Result};
