//! Flashcard study with SM-2 spaced repetition.
//!
//! [`scheduler`] holds the pure scheduling engine. The remaining modules build a
//! small study application around it: deck files, SQLite persistence, study
//! sessions and the command-line front end.

pub mod app;
pub mod clock;
pub mod config;
pub mod deck;
pub mod scheduler;
pub mod session;
pub mod storage;

pub use clock::{Clock, FixedClock, SystemClock};
pub use scheduler::{
    Prioritized, Quality, QualityThresholds, ReviewScheduler, ReviewState, Scheduled,
    SchedulingResult, score_quality,
};
