use crate::clock::Clock;
use crate::scheduler::{
    INITIAL_DIFFICULTY, Prioritized, ReviewScheduler, ReviewState, Scheduled, SchedulingResult,
};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, Row, params};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

const CARD_COLUMNS: &str = "id, folder, deck, front, back, difficulty, review_count,
    correct_count, interval_days, due_date, last_review, created_at";

/// Stored card state in the database
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCard {
    pub id: i64,
    pub folder: String,
    pub deck: String,
    pub front: String,
    pub back: String,
    pub difficulty: f64,
    pub review_count: u32,
    pub correct_count: u32,
    pub interval_days: u32,
    pub due_date: DateTime<Utc>,
    pub last_review: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StoredCard {
    pub fn review_state(&self) -> ReviewState {
        ReviewState {
            difficulty: self.difficulty,
            review_count: self.review_count,
            correct_count: self.correct_count,
            last_review_date: self.last_review,
        }
    }

    /// Copy a scheduling result into this card
    pub fn apply(&mut self, result: &SchedulingResult, reviewed_at: DateTime<Utc>) {
        self.difficulty = result.difficulty;
        self.review_count = result.review_count;
        self.correct_count = result.correct_count;
        self.interval_days = result.interval;
        self.due_date = result.next_review_date;
        self.last_review = Some(reviewed_at);
    }
}

impl Scheduled for StoredCard {
    fn next_review_date(&self) -> DateTime<Utc> {
        self.due_date
    }
}

impl Prioritized for StoredCard {
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A review log entry
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub id: i64,
    pub card_id: i64,
    pub quality: u8,
    pub response_time_ms: Option<u64>,
    pub was_correct: bool,
    pub reviewed_at: DateTime<Utc>,
}

/// Per-deck card counts
#[derive(Debug, Clone, PartialEq)]
pub struct DeckStats {
    pub folder: String,
    pub name: String,
    pub description: Option<String>,
    pub total: u32,
    pub due: u32,
}

/// Fixed-width UTC timestamps so stored values compare correctly as text
fn fmt_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    value.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn card_from_row(row: &Row<'_>) -> rusqlite::Result<StoredCard> {
    let id: i64 = row.get(0)?;
    let last_review = row
        .get::<_, Option<String>>(10)?
        .and_then(|s| match s.parse() {
            Ok(time) => Some(time),
            Err(e) => {
                log::warn!("Ignoring unparseable last_review '{}' on card {}: {}", s, id, e);
                None
            }
        });

    Ok(StoredCard {
        id,
        folder: row.get(1)?,
        deck: row.get(2)?,
        front: row.get(3)?,
        back: row.get(4)?,
        difficulty: row.get(5)?,
        review_count: row.get(6)?,
        correct_count: row.get(7)?,
        interval_days: row.get(8)?,
        due_date: parse_time(9, row.get(9)?)?,
        last_review,
        created_at: parse_time(11, row.get(11)?)?,
    })
}

pub struct Storage {
    conn: Connection,
}

impl Storage {
    /// Open or create the database
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        let storage = Storage { conn };
        storage.init_schema()?;

        Ok(storage)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS cards (
                id INTEGER PRIMARY KEY,
                folder TEXT NOT NULL DEFAULT '',
                deck TEXT NOT NULL,
                front TEXT NOT NULL,
                back TEXT NOT NULL,
                difficulty REAL NOT NULL DEFAULT {INITIAL_DIFFICULTY:.1},
                review_count INTEGER NOT NULL DEFAULT 0,
                correct_count INTEGER NOT NULL DEFAULT 0,
                interval_days INTEGER NOT NULL DEFAULT 0,
                due_date TEXT NOT NULL,
                last_review TEXT,
                created_at TEXT NOT NULL,
                UNIQUE(deck, front)
            );

            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY,
                card_id INTEGER NOT NULL,
                quality INTEGER NOT NULL,
                response_time_ms INTEGER,
                was_correct INTEGER NOT NULL,
                reviewed_at TEXT NOT NULL,
                FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_cards_deck ON cards(deck);
            CREATE INDEX IF NOT EXISTS idx_reviews_card ON reviews(card_id);
            "
        ))?;

        Ok(())
    }

    /// Insert a card, or refresh its back/folder if the deck already has it.
    /// New cards are due immediately.
    pub fn upsert_card(
        &self,
        folder: &str,
        deck: &str,
        front: &str,
        back: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        let now = fmt_time(now);

        self.conn.execute(
            "INSERT INTO cards (folder, deck, front, back, due_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(deck, front) DO UPDATE SET back = ?4, folder = ?1",
            params![folder, deck, front, back, now],
        )?;

        let id = self.conn.query_row(
            "SELECT id FROM cards WHERE deck = ?1 AND front = ?2",
            params![deck, front],
            |row| row.get(0),
        )?;

        Ok(id)
    }

    /// Delete cards of a deck whose front is no longer in the deck file
    pub fn delete_removed_cards(&self, deck: &str, fronts: &HashSet<String>) -> Result<usize> {
        let mut stmt = self.conn.prepare("SELECT id, front FROM cards WHERE deck = ?1")?;
        let stale: Vec<i64> = stmt
            .query_map(params![deck], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|(_, front)| !fronts.contains(front))
            .map(|(id, _)| id)
            .collect();

        for id in &stale {
            self.conn.execute("DELETE FROM cards WHERE id = ?1", params![id])?;
        }

        Ok(stale.len())
    }

    /// Delete every card belonging to a deck not in `active`
    pub fn delete_orphaned_decks(&self, active: &HashSet<String>) -> Result<usize> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT deck FROM cards")?;
        let orphaned: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|deck| !active.contains(deck))
            .collect();

        let mut deleted = 0;
        for deck in &orphaned {
            log::info!("Removing deck '{}' (file no longer exists)", deck);
            deleted += self
                .conn
                .execute("DELETE FROM cards WHERE deck = ?1", params![deck])?;
        }

        Ok(deleted)
    }

    /// Get a card by ID
    pub fn get_card(&self, id: i64) -> Result<Option<StoredCard>> {
        let card = self.conn.query_row(
            &format!("SELECT {CARD_COLUMNS} FROM cards WHERE id = ?1"),
            params![id],
            card_from_row,
        );

        match card {
            Ok(c) => Ok(Some(c)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get all cards for a deck
    pub fn get_cards_for_deck(&self, deck: &str) -> Result<Vec<StoredCard>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {CARD_COLUMNS} FROM cards WHERE deck = ?1 ORDER BY id"
        ))?;

        let cards = stmt
            .query_map(params![deck], card_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(cards)
    }

    /// Get every card in every deck
    pub fn get_all_cards(&self) -> Result<Vec<StoredCard>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {CARD_COLUMNS} FROM cards ORDER BY id"))?;

        let cards = stmt
            .query_map([], card_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(cards)
    }

    /// Persist the outcome of a review
    pub fn apply_schedule(
        &self,
        id: i64,
        result: &SchedulingResult,
        reviewed_at: DateTime<Utc>,
    ) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE cards SET
                difficulty = ?1,
                review_count = ?2,
                correct_count = ?3,
                interval_days = ?4,
                due_date = ?5,
                last_review = ?6
             WHERE id = ?7",
            params![
                result.difficulty,
                result.review_count,
                result.correct_count,
                result.interval,
                fmt_time(result.next_review_date),
                fmt_time(reviewed_at),
                id
            ],
        )?;

        if updated == 0 {
            anyhow::bail!("No card with id {}", id);
        }

        Ok(())
    }

    /// Record a review
    pub fn record_review(
        &self,
        card_id: i64,
        quality: u8,
        response_time_ms: Option<u64>,
        was_correct: bool,
        reviewed_at: DateTime<Utc>,
    ) -> Result<i64> {
        let response_time_ms = response_time_ms.map(|ms| i64::try_from(ms).unwrap_or(i64::MAX));

        self.conn.execute(
            "INSERT INTO reviews (card_id, quality, response_time_ms, was_correct, reviewed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                card_id,
                quality,
                response_time_ms,
                was_correct,
                fmt_time(reviewed_at)
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    /// Get the review log for a card, oldest first
    pub fn get_reviews_for_card(&self, card_id: i64) -> Result<Vec<Review>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, card_id, quality, response_time_ms, was_correct, reviewed_at
             FROM reviews WHERE card_id = ?1 ORDER BY reviewed_at ASC, id ASC",
        )?;

        let reviews = stmt
            .query_map(params![card_id], |row| {
                Ok(Review {
                    id: row.get(0)?,
                    card_id: row.get(1)?,
                    quality: row.get(2)?,
                    response_time_ms: row
                        .get::<_, Option<i64>>(3)?
                        .map(|ms| u64::try_from(ms).unwrap_or(0)),
                    was_correct: row.get(4)?,
                    reviewed_at: parse_time(5, row.get(5)?)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(reviews)
    }

    /// Get all decks with total and due card counts.
    /// Due counts go through the scheduler so they match what a session would queue.
    pub fn get_deck_stats<C: Clock>(
        &self,
        scheduler: &ReviewScheduler<C>,
        descriptions: &HashMap<String, String>,
    ) -> Result<Vec<DeckStats>> {
        let mut decks: BTreeMap<(String, String), Vec<StoredCard>> = BTreeMap::new();
        for card in self.get_all_cards()? {
            decks
                .entry((card.folder.clone(), card.deck.clone()))
                .or_default()
                .push(card);
        }

        let stats = decks
            .into_iter()
            .map(|((folder, name), cards)| DeckStats {
                description: descriptions.get(&name).cloned(),
                total: u32::try_from(cards.len()).unwrap_or(u32::MAX),
                due: u32::try_from(scheduler.filter_due(&cards).len()).unwrap_or(u32::MAX),
                folder,
                name,
            })
            .collect();

        Ok(stats)
    }

    /// Copy the database aside once per day. Returns the backup path if one was written.
    pub fn create_daily_backup(db_path: &Path, today: NaiveDate) -> Result<Option<PathBuf>> {
        if !db_path.exists() {
            return Ok(None);
        }

        let backup = db_path.with_extension(format!("{}.bak", today.format("%Y-%m-%d")));
        if backup.exists() {
            return Ok(None);
        }

        std::fs::copy(db_path, &backup)
            .with_context(|| format!("Failed to back up database to {}", backup.display()))?;
        log::info!("Backed up database to {}", backup.display());

        Ok(Some(backup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    fn scheduler() -> ReviewScheduler<FixedClock> {
        ReviewScheduler::with_clock(FixedClock(now()))
    }

    fn open() -> (TempDir, Storage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(&dir.path().join("test.db")).unwrap();
        (dir, storage)
    }

    #[test]
    fn test_upsert_new_card_is_due() {
        let (_dir, storage) = open();
        let id = storage
            .upsert_card("", "geo", "France", "Paris", now())
            .unwrap();

        let card = storage.get_card(id).unwrap().unwrap();
        assert_eq!(card.front, "France");
        assert_eq!(card.difficulty, INITIAL_DIFFICULTY);
        assert_eq!(card.review_count, 0);
        assert_eq!(card.correct_count, 0);
        assert_eq!(card.due_date, now());
        assert_eq!(card.created_at, now());
        assert_eq!(card.last_review, None);
    }

    #[test]
    fn test_upsert_existing_keeps_progress() {
        let (_dir, storage) = open();
        let id = storage.upsert_card("", "geo", "France", "Paris", now()).unwrap();

        let result = SchedulingResult {
            difficulty: 2.6,
            interval: 6,
            next_review_date: now() + Duration::days(6),
            review_count: 2,
            correct_count: 2,
        };
        storage.apply_schedule(id, &result, now()).unwrap();

        let later = now() + Duration::days(1);
        let same_id = storage
            .upsert_card("europe", "geo", "France", "Paris!", later)
            .unwrap();
        assert_eq!(same_id, id);

        let card = storage.get_card(id).unwrap().unwrap();
        assert_eq!(card.back, "Paris!");
        assert_eq!(card.folder, "europe");
        assert_eq!(card.review_count, 2);
        assert_eq!(card.interval_days, 6);
        assert_eq!(card.created_at, now());
        assert_eq!(card.last_review, Some(now()));
    }

    #[test]
    fn test_get_missing_card() {
        let (_dir, storage) = open();
        assert!(storage.get_card(42).unwrap().is_none());
    }

    #[test]
    fn test_apply_schedule_missing_card() {
        let (_dir, storage) = open();
        let result = SchedulingResult {
            difficulty: 2.5,
            interval: 1,
            next_review_date: now(),
            review_count: 1,
            correct_count: 1,
        };
        assert!(storage.apply_schedule(7, &result, now()).is_err());
    }

    #[test]
    fn test_sync_deletes_removed_and_orphaned() {
        let (_dir, storage) = open();
        storage.upsert_card("", "geo", "France", "Paris", now()).unwrap();
        let spain = storage.upsert_card("", "geo", "Spain", "Madrid", now()).unwrap();
        storage.upsert_card("", "old", "Q", "A", now()).unwrap();
        storage.record_review(spain, 4, None, true, now()).unwrap();

        let keep: HashSet<String> = ["France".to_string()].into();
        assert_eq!(storage.delete_removed_cards("geo", &keep).unwrap(), 1);
        assert!(storage.get_card(spain).unwrap().is_none());
        assert!(storage.get_reviews_for_card(spain).unwrap().is_empty());

        let active: HashSet<String> = ["geo".to_string()].into();
        assert_eq!(storage.delete_orphaned_decks(&active).unwrap(), 1);
        assert!(storage.get_cards_for_deck("old").unwrap().is_empty());
        assert_eq!(storage.get_all_cards().unwrap().len(), 1);
    }

    #[test]
    fn test_review_log() {
        let (_dir, storage) = open();
        let id = storage.upsert_card("", "geo", "France", "Paris", now()).unwrap();

        storage.record_review(id, 0, Some(12_000), false, now()).unwrap();
        storage
            .record_review(id, 5, None, true, now() + Duration::minutes(5))
            .unwrap();

        let reviews = storage.get_reviews_for_card(id).unwrap();
        assert_eq!(reviews.len(), 2);
        assert_eq!(reviews[0].quality, 0);
        assert_eq!(reviews[0].response_time_ms, Some(12_000));
        assert!(!reviews[0].was_correct);
        assert_eq!(reviews[1].response_time_ms, None);
        assert!(reviews[1].was_correct);
    }

    #[test]
    fn test_deck_stats() {
        let (_dir, storage) = open();
        let france = storage.upsert_card("", "geo", "France", "Paris", now()).unwrap();
        storage.upsert_card("", "geo", "Spain", "Madrid", now()).unwrap();
        storage
            .upsert_card("languages", "languages/spanish", "hola", "hello", now())
            .unwrap();

        let result = SchedulingResult {
            difficulty: 2.5,
            interval: 1,
            next_review_date: now() + Duration::days(1),
            review_count: 1,
            correct_count: 1,
        };
        storage.apply_schedule(france, &result, now()).unwrap();

        let descriptions: HashMap<String, String> =
            [("geo".to_string(), "Capitals".to_string())].into();
        let stats = storage.get_deck_stats(&scheduler(), &descriptions).unwrap();

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "geo");
        assert_eq!(stats[0].description.as_deref(), Some("Capitals"));
        assert_eq!(stats[0].total, 2);
        assert_eq!(stats[0].due, 1);
        assert_eq!(stats[1].folder, "languages");
        assert_eq!(stats[1].due, 1);
    }

    #[test]
    fn test_far_future_review_not_counted_as_due() {
        let (_dir, storage) = open();
        let id = storage.upsert_card("", "geo", "France", "Paris", now()).unwrap();

        let far_future = Utc.with_ymd_and_hms(41428, 9, 30, 12, 0, 0).unwrap();
        let result = SchedulingResult {
            difficulty: 3.0,
            interval: u32::MAX,
            next_review_date: far_future,
            review_count: 12,
            correct_count: 12,
        };
        storage.apply_schedule(id, &result, now()).unwrap();

        let card = storage.get_card(id).unwrap().unwrap();
        assert_eq!(card.due_date, far_future);
        assert!(scheduler().filter_due(&[card]).is_empty());

        let stats = storage.get_deck_stats(&scheduler(), &HashMap::new()).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].total, 1);
        assert_eq!(stats[0].due, 0);

        let max = SchedulingResult {
            next_review_date: DateTime::<Utc>::MAX_UTC,
            ..result
        };
        storage.apply_schedule(id, &max, now()).unwrap();
        let stats = storage.get_deck_stats(&scheduler(), &HashMap::new()).unwrap();
        assert_eq!(stats[0].due, 0);
    }

    #[test]
    fn test_daily_backup_once() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("cards.db");
        let today = now().date_naive();

        assert!(Storage::create_daily_backup(&db_path, today).unwrap().is_none());

        Storage::open(&db_path).unwrap();
        let backup = Storage::create_daily_backup(&db_path, today).unwrap().unwrap();
        assert!(backup.exists());
        assert!(Storage::create_daily_backup(&db_path, today).unwrap().is_none());
    }
}
