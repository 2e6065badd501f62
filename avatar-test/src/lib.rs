//! Test utilities for the avatar client and load generator.
//!
//! This crate provides utilities to facilitate testing against a local stand-in for the avatar
//! service. See the modules for all available utilities.

pub mod fixtures;
pub mod server;
pub mod tracing;
