#![cfg_attr(not(test), no_std)]

// must come first so the logging macros are visible in every other module
pub(crate) mod fmt;

pub mod batch;
pub mod config;
pub mod hal;
pub mod registry;
pub mod scheduler;
pub mod sensor;
pub mod sink;
pub mod time;

#[cfg(test)]
pub(crate) mod mocks;
