//! # Threading Configuration
//!
//! ## Role
//! Configure rayon thread pools. Per-sample work runs inside the pool via
//! `pool.install(..)`; results never depend on the number of threads because every
//! sample draws from its own seeded RNG stream.

use crate::error::{PhaseError, Result};

/// Create a named thread pool. `None` uses rayon's default (one thread per core).
pub fn build_thread_pool(n_threads: Option<usize>) -> Result<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new().thread_name(|i| format!("rephase-worker-{}", i));
    if let Some(n) = n_threads {
        if n == 0 {
            return Err(PhaseError::config("thread count must be at least 1"));
        }
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| PhaseError::config(format!("Failed to create thread pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_thread_pool() {
        let pool = build_thread_pool(Some(2)).unwrap();
        assert_eq!(pool.current_num_threads(), 2);
        assert!(build_thread_pool(Some(0)).is_err());
    }
}
