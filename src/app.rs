use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::deck::{Deck, list_decks};
use crate::scheduler::ReviewScheduler;
use crate::session::{Outcome, SessionOptions, StudySession};
use crate::storage::{Storage, StoredCard};
use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Write};
use std::time::Instant;

/// Main application state
pub struct App<C = SystemClock> {
    config: Config,
    storage: Storage,
    clock: C,
}

impl App<SystemClock> {
    /// Create a new application
    pub fn new(config: Config) -> Result<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock + Clone> App<C> {
    pub fn with_clock(config: Config, clock: C) -> Result<Self> {
        config.ensure_dirs()?;
        Storage::create_daily_backup(&config.db_path, clock.now().date_naive())?;
        let storage = Storage::open(&config.db_path)?;

        Ok(Self {
            config,
            storage,
            clock,
        })
    }

    fn scheduler(&self) -> ReviewScheduler<C> {
        ReviewScheduler::with_clock(self.clock.clone())
    }

    /// Load deck files and sync them into the database.
    /// Returns deck descriptions keyed by deck name.
    pub fn sync_decks(&self) -> Result<HashMap<String, String>> {
        let deck_files = list_decks(&self.config.decks_dir)?;
        let mut active_decks = HashSet::new();
        let mut descriptions = HashMap::new();
        let now = self.clock.now();

        for path in deck_files {
            let deck = Deck::load(&self.config.decks_dir, &path)?;
            let key = deck.key();

            let mut fronts = HashSet::new();
            for card in &deck.cards {
                fronts.insert(card.front.clone());
                self.storage
                    .upsert_card(&deck.folder, &key, &card.front, &card.back, now)?;
            }

            let removed = self.storage.delete_removed_cards(&key, &fronts)?;
            if removed > 0 {
                log::info!("Removed {} cards no longer in deck '{}'", removed, key);
            }

            if let Some(description) = deck.description {
                descriptions.insert(key.clone(), description);
            }
            active_decks.insert(key);
        }

        self.storage.delete_orphaned_decks(&active_decks)?;
        log::info!("Synced {} decks", active_decks.len());

        Ok(descriptions)
    }

    /// Cards of a deck, or of every deck inside a folder, or everything
    fn cards_in_scope(&self, scope: Option<&str>) -> Result<Vec<StoredCard>> {
        let cards = self.storage.get_all_cards()?;
        let Some(scope) = scope.map(|s| s.trim_matches('/')) else {
            return Ok(cards);
        };

        let prefix = format!("{}/", scope);
        let selected: Vec<StoredCard> = cards
            .into_iter()
            .filter(|c| c.deck == scope || c.deck.starts_with(&prefix))
            .collect();

        if selected.is_empty() {
            anyhow::bail!("Unknown deck or folder '{}'", scope);
        }

        Ok(selected)
    }

    /// Print every deck with its total and due counts
    pub fn list(&self, out: &mut impl Write) -> Result<()> {
        let descriptions = self.sync_decks()?;
        let stats = self.storage.get_deck_stats(&self.scheduler(), &descriptions)?;

        if stats.is_empty() {
            writeln!(
                out,
                "No decks found. Add .tsv files to {}",
                self.config.decks_dir.display()
            )?;
            return Ok(());
        }

        let mut folder = None;
        for deck in &stats {
            if folder != Some(&deck.folder) {
                let label = if deck.folder.is_empty() {
                    "/"
                } else {
                    deck.folder.as_str()
                };
                writeln!(out, "{}", label)?;
                folder = Some(&deck.folder);
            }
            write!(
                out,
                "  {:<30} {:>4} due / {:>4} total",
                deck.name, deck.due, deck.total
            )?;
            if let Some(description) = &deck.description {
                write!(out, "  {}", description)?;
            }
            writeln!(out)?;
        }

        Ok(())
    }

    /// Print the due cards in the order a session would show them
    pub fn queue(&self, scope: Option<&str>, out: &mut impl Write) -> Result<()> {
        self.sync_decks()?;
        let cards = self.cards_in_scope(scope)?;
        let scheduler = self.scheduler();
        let queue = scheduler.sort_by_priority(&scheduler.filter_due(&cards));

        if queue.is_empty() {
            writeln!(out, "Nothing due.")?;
            return Ok(());
        }

        for card in &queue {
            writeln!(
                out,
                "{:>6}  {:<24} {}  (due {})",
                card.id,
                card.deck,
                card.front,
                card.due_date.format("%Y-%m-%d %H:%M")
            )?;
        }
        writeln!(out, "{} cards due", queue.len())?;

        Ok(())
    }

    /// Run an interactive study session over line-based input
    pub fn study(
        &self,
        scope: Option<&str>,
        input: &mut impl BufRead,
        out: &mut impl Write,
    ) -> Result<()> {
        self.sync_decks()?;
        let cards = self.cards_in_scope(scope)?;
        let mut session =
            StudySession::start(&cards, self.scheduler(), SessionOptions::from(&self.config));

        if session.is_finished() {
            writeln!(out, "Nothing due. Come back later!")?;
            return Ok(());
        }

        let mut position = 0;
        while let Some(card) = session.current() {
            position += 1;
            writeln!(out)?;
            writeln!(out, "[{} | {} left] {}", position, session.remaining(), card.deck)?;
            writeln!(out, "  Q: {}", card.front)?;
            write!(out, "  (Enter to reveal, q to quit) ")?;
            out.flush()?;

            let shown_at = Instant::now();
            let Some(line) = read_line(input)? else { break };
            if line.eq_ignore_ascii_case("q") {
                break;
            }
            let response_time_ms =
                u64::try_from(shown_at.elapsed().as_millis()).unwrap_or(u64::MAX);

            writeln!(out, "  A: {}", card.back)?;
            let Some(was_correct) = ask_correct(input, out)? else { break };

            let Some(outcome) = session.answer(was_correct, Some(response_time_ms)) else {
                break;
            };
            self.persist(&outcome)?;

            if outcome.requeued {
                writeln!(out, "  Again later this session.")?;
            } else {
                writeln!(out, "  Next review {}", format_interval(outcome.result.interval))?;
            }
        }

        let stats = session.stats();
        writeln!(out)?;
        writeln!(
            out,
            "Reviewed {} cards, {} correct ({:.0}%)",
            stats.reviewed,
            stats.correct,
            stats.accuracy() * 100.0
        )?;

        Ok(())
    }

    /// Record a single answer for a card outside of a session
    pub fn review(
        &self,
        card_id: i64,
        was_correct: bool,
        response_time_ms: Option<u64>,
        out: &mut impl Write,
    ) -> Result<()> {
        let card = self
            .storage
            .get_card(card_id)?
            .with_context(|| format!("No card with id {}", card_id))?;

        let quality = self
            .config
            .quality_thresholds()
            .score(was_correct, response_time_ms);
        let result = self.scheduler().next_review(&card.review_state(), quality);
        let reviewed_at = self.clock.now();

        let mut updated = card;
        updated.apply(&result, reviewed_at);
        self.persist(&Outcome {
            card: updated,
            quality,
            result: result.clone(),
            was_correct,
            response_time_ms,
            reviewed_at,
            requeued: false,
        })?;

        writeln!(
            out,
            "Card {}: quality {}, next review {} ({}), difficulty {:.2}",
            card_id,
            quality.as_u8(),
            format_interval(result.interval),
            result.next_review_date.format("%Y-%m-%d"),
            result.difficulty
        )?;

        Ok(())
    }

    fn persist(&self, outcome: &Outcome) -> Result<()> {
        self.storage
            .apply_schedule(outcome.card.id, &outcome.result, outcome.reviewed_at)?;
        self.storage.record_review(
            outcome.card.id,
            outcome.quality.as_u8(),
            outcome.response_time_ms,
            outcome.was_correct,
            outcome.reviewed_at,
        )?;
        Ok(())
    }
}

/// Next trimmed line, or None at end of input
fn read_line(input: &mut impl BufRead) -> Result<Option<String>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

/// Ask until the answer is y or n. None means quit.
fn ask_correct(input: &mut impl BufRead, out: &mut impl Write) -> Result<Option<bool>> {
    loop {
        write!(out, "  Correct? [y/n/q] ")?;
        out.flush()?;

        let Some(line) = read_line(input)? else {
            return Ok(None);
        };
        match line.to_lowercase().as_str() {
            "y" | "yes" => return Ok(Some(true)),
            "n" | "no" => return Ok(Some(false)),
            "q" | "quit" => return Ok(None),
            _ => {}
        }
    }
}

/// Format an interval in days to a human-readable string
pub fn format_interval(days: u32) -> String {
    match days {
        0 => "now".to_string(),
        1 => "tomorrow".to_string(),
        2..=6 => format!("in {} days", days),
        7..=29 => format!("in {} weeks", days / 7),
        30..=364 => format!("in {} months", days / 30),
        _ => format!("in {} years", days / 365),
    }
}
