//! # Telemetry Blackboard
//!
//! Thread-safe progress tracking for the phasing pipeline.
//! Uses atomic counters that can be cheaply updated from rayon parallel iterators;
//! the pipeline reads a snapshot at the end of each iteration and reports it through
//! `tracing`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Processing stage for high-level progress tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Initializing = 0,
    Indexing = 1,
    PhasingBurnin = 2,
    PhasingMain = 3,
    Finalizing = 4,
    Complete = 5,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initializing => "Initializing",
            Stage::Indexing => "Indexing",
            Stage::PhasingBurnin => "Phasing (burn-in)",
            Stage::PhasingMain => "Phasing (main)",
            Stage::Finalizing => "Finalizing",
            Stage::Complete => "Complete",
        }
    }

    fn from_u64(val: u64) -> Self {
        match val {
            0 => Stage::Initializing,
            1 => Stage::Indexing,
            2 => Stage::PhasingBurnin,
            3 => Stage::PhasingMain,
            4 => Stage::Finalizing,
            _ => Stage::Complete,
        }
    }
}

/// Progress counters shared by all workers of a run.
///
/// All fields use relaxed ordering; readers only need approximate values.
#[derive(Debug)]
pub struct Progress {
    stage: AtomicU64,
    current_iteration: AtomicU64,
    total_iterations: AtomicU64,
    samples_processed: AtomicU64,
    total_samples: AtomicU64,
    fallbacks: AtomicU64,
    segments: AtomicU64,
    start_time: Instant,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub stage: Stage,
    pub current_iteration: u64,
    pub total_iterations: u64,
    pub samples_processed: u64,
    pub total_samples: u64,
    pub fallbacks: u64,
    pub segments: u64,
    pub elapsed_secs: f64,
}

impl Progress {
    pub fn new(total_samples: usize, total_iterations: usize) -> Self {
        Self {
            stage: AtomicU64::new(Stage::Initializing as u64),
            current_iteration: AtomicU64::new(0),
            total_iterations: AtomicU64::new(total_iterations as u64),
            samples_processed: AtomicU64::new(0),
            total_samples: AtomicU64::new(total_samples as u64),
            fallbacks: AtomicU64::new(0),
            segments: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        Stage::from_u64(self.stage.load(Ordering::Relaxed))
    }

    /// Reset per-iteration counters
    pub fn start_iteration(&self, iteration: usize) {
        self.current_iteration.store(iteration as u64, Ordering::Relaxed);
        self.samples_processed.store(0, Ordering::Relaxed);
        self.segments.store(0, Ordering::Relaxed);
    }

    /// One sample finished its pass with `n_segments` segments
    #[inline]
    pub fn sample_done(&self, n_segments: usize) {
        self.samples_processed.fetch_add(1, Ordering::Relaxed);
        self.segments.fetch_add(n_segments as u64, Ordering::Relaxed);
    }

    /// One sample fell back to its unphased default
    #[inline]
    pub fn fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            stage: self.stage(),
            current_iteration: self.current_iteration.load(Ordering::Relaxed),
            total_iterations: self.total_iterations.load(Ordering::Relaxed),
            samples_processed: self.samples_processed.load(Ordering::Relaxed),
            total_samples: self.total_samples.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            segments: self.segments.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed_secs(),
        }
    }

    /// Log the current snapshot at info level
    pub fn report(&self) {
        let snap = self.snapshot();
        let mean_segments = if snap.samples_processed > 0 {
            snap.segments as f64 / snap.samples_processed as f64
        } else {
            0.0
        };
        tracing::info!(
            stage = snap.stage.as_str(),
            iteration = snap.current_iteration,
            of = snap.total_iterations,
            samples = snap.samples_processed,
            total_samples = snap.total_samples,
            fallbacks = snap.fallbacks,
            mean_segments = format!("{:.1}", mean_segments),
            elapsed = format_duration(snap.elapsed_secs),
            "progress"
        );
    }
}

/// Format duration in human-readable form
fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs % 60.0;
        format!("{:.0}m{:.0}s", mins, remaining_secs)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}
