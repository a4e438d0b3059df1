//! Runtime execution modes.
//!
//! - `hub`: line-based interactive demo driven by a nested signal loop

pub mod hub;
