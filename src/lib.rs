//! Multi-source margin forecasting for round-based sports tipping.
//!
//! Sources are fetched concurrently, bound to the target's fixtures by fuzzy
//! team-name matching and folded into one weighted forecast. Raw predictions
//! and results are persisted idempotently and used to score sources after
//! each round.

pub mod agent;
pub mod config;
pub mod data;
pub mod db;
pub mod error;
pub mod fixtures;
pub mod forecast;
pub mod monitoring;
pub mod target;
