//! # Utilities Module
//!
//! ## Role
//! Cross-cutting helpers that don't belong in domain-specific modules.
//!
//! ## Sub-modules
//! - `telemetry`: Atomic progress counters updated from rayon workers
//! - `threading`: Rayon thread pool configuration

pub mod telemetry;
pub mod threading;
