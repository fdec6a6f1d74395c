//! Ingestion of California DMV office wait times
//!
//! A run fetches the public wait-time feed ([`providers::dmv`]), splits and
//! parses it ([`feed`]), stamps every row with one capture time
//! ([`normalize`]) and appends the snapshot to SQLite ([`db`]).
//! [`sync::Ingestor`] ties the stages together.

pub mod api;
pub mod config;
pub mod db;
pub mod feed;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod providers;
pub mod sync;
