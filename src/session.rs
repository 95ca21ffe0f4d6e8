//! Study session queue.
//!
//! A session is built from every card in scope, keeps only the due ones in
//! priority order and hands out scheduling outcomes one answer at a time.
//! Writing outcomes back to storage is left to the caller.

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::scheduler::{Quality, QualityThresholds, ReviewScheduler, SchedulingResult};
use crate::storage::StoredCard;
use chrono::{DateTime, Utc};
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub limit: Option<usize>,
    pub requeue_failed: bool,
    pub thresholds: QualityThresholds,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            limit: None,
            requeue_failed: true,
            thresholds: QualityThresholds::default(),
        }
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            limit: config.session_limit,
            requeue_failed: config.requeue_failed,
            thresholds: config.quality_thresholds(),
        }
    }
}

/// Study session statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub reviewed: usize,
    pub correct: usize,
}

impl SessionStats {
    /// Share of correct answers, 0.0 when nothing was reviewed
    pub fn accuracy(&self) -> f64 {
        if self.reviewed == 0 {
            0.0
        } else {
            self.correct as f64 / self.reviewed as f64
        }
    }
}

/// Result of answering the current card
#[derive(Debug, Clone)]
pub struct Outcome {
    /// The card with the new schedule already applied
    pub card: StoredCard,
    pub quality: Quality,
    pub result: SchedulingResult,
    pub was_correct: bool,
    pub response_time_ms: Option<u64>,
    pub reviewed_at: DateTime<Utc>,
    /// Card was put back at the end of the queue
    pub requeued: bool,
}

pub struct StudySession<C = SystemClock> {
    scheduler: ReviewScheduler<C>,
    options: SessionOptions,
    queue: VecDeque<StoredCard>,
    requeued: HashSet<i64>,
    stats: SessionStats,
}

impl<C: Clock> StudySession<C> {
    /// Queue the due cards in priority order, capped at the session limit
    pub fn start(
        cards: &[StoredCard],
        scheduler: ReviewScheduler<C>,
        options: SessionOptions,
    ) -> Self {
        let due = scheduler.filter_due(cards);
        let mut queue = scheduler.sort_by_priority(&due);
        if let Some(limit) = options.limit {
            queue.truncate(limit);
        }

        log::info!(
            "Starting session with {} of {} cards ({} due)",
            queue.len(),
            cards.len(),
            due.len()
        );

        Self {
            scheduler,
            options,
            queue: queue.into(),
            requeued: HashSet::new(),
            stats: SessionStats::default(),
        }
    }

    /// Card currently being shown
    pub fn current(&self) -> Option<&StoredCard> {
        self.queue.front()
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn is_finished(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Score and schedule the current card, then move on to the next one
    pub fn answer(&mut self, was_correct: bool, response_time_ms: Option<u64>) -> Option<Outcome> {
        let mut card = self.queue.pop_front()?;

        let quality = self.options.thresholds.score(was_correct, response_time_ms);
        let result = self.scheduler.next_review(&card.review_state(), quality);
        let reviewed_at = self.scheduler.now();
        card.apply(&result, reviewed_at);

        log::debug!(
            "Card {} scored {} -> interval {}d, difficulty {:.2}",
            card.id,
            quality.as_u8(),
            result.interval,
            result.difficulty
        );

        self.stats.reviewed += 1;
        if quality.is_pass() {
            self.stats.correct += 1;
        }

        let requeued =
            !quality.is_pass() && self.options.requeue_failed && self.requeued.insert(card.id);
        if requeued {
            self.queue.push_back(card.clone());
        }

        Some(Outcome {
            card,
            quality,
            result,
            was_correct,
            response_time_ms,
            reviewed_at,
            requeued,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::scheduler::INITIAL_DIFFICULTY;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn scheduler() -> ReviewScheduler<FixedClock> {
        ReviewScheduler::with_clock(FixedClock(now()))
    }

    fn card(id: i64, due_offset_hours: i64, created_days_ago: i64) -> StoredCard {
        StoredCard {
            id,
            folder: String::new(),
            deck: "geo".to_string(),
            front: format!("front {}", id),
            back: format!("back {}", id),
            difficulty: INITIAL_DIFFICULTY,
            review_count: 0,
            correct_count: 0,
            interval_days: 0,
            due_date: now() + Duration::hours(due_offset_hours),
            last_review: None,
            created_at: now() - Duration::days(created_days_ago),
        }
    }

    fn ids(session: &StudySession<FixedClock>) -> Vec<i64> {
        session.queue.iter().map(|c| c.id).collect()
    }

    #[test]
    fn test_queue_only_due_cards_oldest_first() {
        let cards = vec![card(1, -2, 1), card(2, 5, 30), card(3, 0, 7), card(4, -100, 3)];
        let session = StudySession::start(&cards, scheduler(), SessionOptions::default());

        assert_eq!(ids(&session), vec![3, 4, 1]);
        assert_eq!(session.current().map(|c| c.id), Some(3));
    }

    #[test]
    fn test_session_limit() {
        let cards = vec![card(1, -1, 1), card(2, -1, 2), card(3, -1, 3)];
        let options = SessionOptions {
            limit: Some(2),
            ..SessionOptions::default()
        };
        let session = StudySession::start(&cards, scheduler(), options);
        assert_eq!(ids(&session), vec![3, 2]);
    }

    #[test]
    fn test_correct_answer_schedules_and_advances() {
        let cards = vec![card(1, -1, 2), card(2, -1, 1)];
        let mut session = StudySession::start(&cards, scheduler(), SessionOptions::default());

        let outcome = session.answer(true, Some(1200)).unwrap();
        assert_eq!(outcome.quality, Quality::Perfect);
        assert_eq!(outcome.card.id, 1);
        assert_eq!(outcome.card.interval_days, 1);
        assert_eq!(outcome.card.correct_count, 1);
        assert_eq!(outcome.card.due_date, now() + Duration::days(1));
        assert_eq!(outcome.card.last_review, Some(now()));
        assert!(!outcome.requeued);

        assert_eq!(session.current().map(|c| c.id), Some(2));
        assert_eq!(session.stats(), SessionStats { reviewed: 1, correct: 1 });
    }

    #[test]
    fn test_failed_card_requeued_once() {
        let cards = vec![card(1, -1, 2), card(2, -1, 1)];
        let mut session = StudySession::start(&cards, scheduler(), SessionOptions::default());

        let first = session.answer(false, Some(800)).unwrap();
        assert_eq!(first.quality, Quality::Blackout);
        assert!(first.requeued);
        assert_eq!(ids(&session), vec![2, 1]);

        session.answer(true, None).unwrap();
        let again = session.answer(false, None).unwrap();
        assert_eq!(again.card.id, 1);
        assert_eq!(again.card.review_count, 2);
        assert!(!again.requeued);

        assert!(session.is_finished());
        assert!(session.answer(true, None).is_none());
        assert_eq!(session.stats().reviewed, 3);
        assert_eq!(session.stats().correct, 1);
    }

    #[test]
    fn test_requeue_disabled() {
        let cards = vec![card(1, -1, 2)];
        let options = SessionOptions {
            requeue_failed: false,
            ..SessionOptions::default()
        };
        let mut session = StudySession::start(&cards, scheduler(), options);

        let outcome = session.answer(false, None).unwrap();
        assert!(!outcome.requeued);
        assert!(session.is_finished());
    }

    #[test]
    fn test_empty_session() {
        let session = StudySession::start(&[], scheduler(), SessionOptions::default());
        assert!(session.is_finished());
        assert_eq!(session.stats().accuracy(), 0.0);
    }
}
