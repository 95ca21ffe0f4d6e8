use anyhow::Result;
use cardwise::app::App;
use cardwise::config::Config;
use clap::{Parser, Subcommand};
use std::io::{stdin, stdout};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "cardwise", about = "Study flashcard decks with spaced repetition", version)]
struct Cli {
    /// Use a specific config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List decks with their due and total card counts
    Decks,

    /// Show due cards in study order
    Queue {
        /// Deck or folder name (default: everything)
        deck: Option<String>,
    },

    /// Study due cards interactively
    Study {
        /// Deck or folder name (default: everything)
        deck: Option<String>,
    },

    /// Record one answer for a card
    Review {
        /// Card id as printed by `queue`
        card_id: i64,
        /// The answer was correct
        #[arg(long, conflicts_with = "incorrect", required_unless_present = "incorrect")]
        correct: bool,
        /// The answer was wrong
        #[arg(long)]
        incorrect: bool,
        /// How long the answer took, in milliseconds
        #[arg(long)]
        time_ms: Option<u64>,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from(path)?
        }
        None => Config::load()?,
    };
    let app = App::new(config)?;
    let mut out = stdout().lock();

    match cli.command.unwrap_or(Command::Decks) {
        Command::Decks => app.list(&mut out),
        Command::Queue { deck } => app.queue(deck.as_deref(), &mut out),
        Command::Study { deck } => app.study(deck.as_deref(), &mut stdin().lock(), &mut out),
        Command::Review {
            card_id,
            correct,
            incorrect: _,
            time_ms,
        } => app.review(card_id, correct, time_ms, &mut out),
    }
}
