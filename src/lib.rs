//! Rookery: a multi-user feed ingestion service.
//!
//! Feeds are polled on adaptive schedules, their entries normalized,
//! deduplicated across feeds, and fanned out as per-subscriber read state.

pub mod config;
pub mod engine;
pub mod feed;
pub mod storage;
