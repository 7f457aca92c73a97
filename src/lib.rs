//! Genre playlist builder - shared modules for the binary.

pub mod cache;
pub mod config;
pub mod consolidate;
pub mod jellyfin;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod playlist;
pub mod progress;
pub mod rate_limit;
pub mod resolver;
pub mod safety;
pub mod scan;
pub mod scoring;
pub mod spotify;
