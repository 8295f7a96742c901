//! Cross-crate scenarios for the API gateway adapter.
//!
//! [`support`] holds the shared fixtures: a registry double whose membership
//! the test controls, and builders for parsed definitions.

pub mod support;

#[cfg(test)]
mod discovery_tests;
#[cfg(test)]
mod property_tests;
#[cfg(test)]
mod scenario_tests;
