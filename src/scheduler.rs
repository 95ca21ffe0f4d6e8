//! SM-2 review scheduling.
//!
//! Every operation here is a pure function of its inputs and the scheduler's
//! clock. Nothing in this module touches storage; callers read a
//! [`ReviewState`], ask for a [`SchedulingResult`] and write it back themselves.

use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Days, Utc};
use std::cmp::Ordering;

/// Ease factor every card starts from
pub const INITIAL_DIFFICULTY: f64 = 2.5;

/// Lowest ease factor SM-2 allows
pub const MIN_DIFFICULTY: f64 = 1.3;

/// Review quality on the SM-2 0-5 scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quality {
    /// Complete blackout
    Blackout = 0,
    /// Wrong, but the answer was recognised
    Incorrect = 1,
    /// Wrong, but the answer felt easy once shown
    IncorrectFamiliar = 2,
    /// Correct with serious difficulty
    Difficult = 3,
    /// Correct after hesitation
    Hesitant = 4,
    /// Perfect recall
    Perfect = 5,
}

impl Quality {
    /// Build a quality from a raw score, clamping it into 0-5
    pub fn clamped(score: i64) -> Self {
        match score.clamp(0, 5) {
            0 => Quality::Blackout,
            1 => Quality::Incorrect,
            2 => Quality::IncorrectFamiliar,
            3 => Quality::Difficult,
            4 => Quality::Hesitant,
            _ => Quality::Perfect,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Quality 3 and above counts as a successful recall
    pub fn is_pass(self) -> bool {
        self >= Quality::Difficult
    }
}

/// Response-time buckets used to grade a correct answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityThresholds {
    /// Below this a correct answer is perfect
    pub fast_ms: u64,
    /// Below this a correct answer is hesitant; anything slower is difficult
    pub hesitation_ms: u64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            fast_ms: 3000,
            hesitation_ms: 5000,
        }
    }
}

impl QualityThresholds {
    /// Grade an answer from correctness and optional response time
    pub fn score(&self, was_correct: bool, response_time_ms: Option<u64>) -> Quality {
        if !was_correct {
            return Quality::Blackout;
        }

        match response_time_ms {
            None => Quality::Hesitant,
            Some(ms) if ms < self.fast_ms => Quality::Perfect,
            Some(ms) if ms < self.hesitation_ms => Quality::Hesitant,
            // Slow answers (even past 10s) are still a pass
            Some(_) => Quality::Difficult,
        }
    }
}

/// Grade an answer with the default thresholds (3s / 5s)
pub fn score_quality(was_correct: bool, response_time_ms: Option<u64>) -> Quality {
    QualityThresholds::default().score(was_correct, response_time_ms)
}

/// Persisted review state of a single card
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewState {
    pub difficulty: f64,
    pub review_count: u32,
    pub correct_count: u32,
    pub last_review_date: Option<DateTime<Utc>>,
}

impl Default for ReviewState {
    fn default() -> Self {
        Self {
            difficulty: INITIAL_DIFFICULTY,
            review_count: 0,
            correct_count: 0,
            last_review_date: None,
        }
    }
}

impl ReviewState {
    /// Merge a scheduling result back into this state
    pub fn apply(&mut self, result: &SchedulingResult, reviewed_at: DateTime<Utc>) {
        self.difficulty = result.difficulty;
        self.review_count = result.review_count;
        self.correct_count = result.correct_count;
        self.last_review_date = Some(reviewed_at);
    }
}

/// Outcome of scheduling one review
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulingResult {
    /// Updated ease factor, rounded to 2 decimals
    pub difficulty: f64,
    /// Days until the next review, always >= 1
    pub interval: u32,
    pub next_review_date: DateTime<Utc>,
    pub review_count: u32,
    pub correct_count: u32,
}

/// Anything with a scheduled review date
pub trait Scheduled {
    fn next_review_date(&self) -> DateTime<Utc>;
}

/// A scheduled card that can be ordered in a study queue
pub trait Prioritized: Scheduled {
    fn created_at(&self) -> DateTime<Utc>;
}

/// SM-2 scheduler reading "now" from an injectable clock
#[derive(Debug, Clone, Default)]
pub struct ReviewScheduler<C = SystemClock> {
    clock: C,
}

impl ReviewScheduler<SystemClock> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> ReviewScheduler<C> {
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Compute the next difficulty, interval and review date for a card
    pub fn next_review(&self, state: &ReviewState, quality: Quality) -> SchedulingResult {
        let difficulty = if state.review_count == 0 || !state.difficulty.is_finite() {
            INITIAL_DIFFICULTY
        } else {
            state.difficulty
        };
        let difficulty = update_difficulty(difficulty, quality);

        let (interval, correct_count) = if quality.is_pass() {
            let correct_count = state.correct_count.saturating_add(1);
            (success_interval(correct_count, difficulty), correct_count)
        } else {
            (1, state.correct_count)
        };

        let next_review_date = self
            .clock
            .now()
            .checked_add_days(Days::new(u64::from(interval)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        SchedulingResult {
            difficulty: round_to_hundredths(difficulty),
            interval,
            next_review_date,
            review_count: state.review_count.saturating_add(1),
            correct_count,
        }
    }

    /// True once the review date has been reached (inclusive)
    pub fn is_due(&self, next_review_date: DateTime<Utc>) -> bool {
        due_at(next_review_date, self.clock.now())
    }

    /// Cards that are due, in their original order
    pub fn filter_due<T: Scheduled + Clone>(&self, cards: &[T]) -> Vec<T> {
        let now = self.clock.now();
        cards
            .iter()
            .filter(|card| due_at(card.next_review_date(), now))
            .cloned()
            .collect()
    }

    /// Order cards for study: overdue before not-yet-due, oldest card first
    /// within each group.
    ///
    /// Difficulty is not part of the ordering.
    pub fn sort_by_priority<T: Prioritized + Clone>(&self, cards: &[T]) -> Vec<T> {
        let now = self.clock.now();
        let mut sorted = cards.to_vec();
        sorted.sort_by(|a, b| compare_priority(a, b, now));
        sorted
    }
}

/// A review date counts as due from that instant on
fn due_at(next_review_date: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now >= next_review_date
}

fn compare_priority<T: Prioritized>(a: &T, b: &T, now: DateTime<Utc>) -> Ordering {
    let a_overdue = due_at(a.next_review_date(), now);
    let b_overdue = due_at(b.next_review_date(), now);

    match (a_overdue, b_overdue) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.created_at().cmp(&b.created_at()),
    }
}

/// EF' = EF + (0.1 - (5-q) * (0.08 + (5-q) * 0.02)), floored at 1.3
fn update_difficulty(difficulty: f64, quality: Quality) -> f64 {
    let distance = 5.0 - f64::from(quality.as_u8());
    let updated = difficulty + (0.1 - distance * (0.08 + distance * 0.02));
    updated.max(MIN_DIFFICULTY)
}

/// Interval after the nth consecutive success: 1, 6, then each step
/// multiplied by the given difficulty.
///
/// History is replayed with the current difficulty rather than the one in
/// effect at each past review.
fn success_interval(successes: u32, difficulty: f64) -> u32 {
    match successes {
        0 | 1 => 1,
        2 => 6,
        n => {
            let mut interval = 6.0_f64;
            for _ in 3..=n {
                interval = (interval * difficulty).round();
            }
            // `as` saturates on overflow
            (interval as u32).max(1)
        }
    }
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
