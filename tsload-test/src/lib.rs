//! Test utilities for the load generator.
//!
//! This crate provides utilities to facilitate testing of the harness. See the modules for all
//! available utilities.

pub mod stores;
pub mod tracing;
