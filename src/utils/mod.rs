//! The `utils` module provides a collection of utility functions and common
//! definitions used across the `fanbus` crate.
//!
//! This module centralizes the error taxonomy and the logging bootstrap so
//! every layer reports failures and progress the same way.

pub mod error;
pub mod logging;

#[cfg(test)]
mod tests;
