//! Trend analytics and periodic reporting engine for a place-ratings
//! platform.
//!
//! Rating events flow in append-only; this crate turns them into windowed
//! statistics on demand (counts, leaderboards, histograms, a dense 30-day
//! series) and into immutable weekly/weekend report snapshots on a cron
//! schedule. Storage sits behind narrow capability traits in [`store`], so
//! the Postgres backend and the in-memory reference backend are
//! interchangeable.

pub mod analytics;
pub mod db;
pub mod error;
pub mod generator;
pub mod models;
pub mod scheduler;
pub mod series;
pub mod service;
pub mod store;
