use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// A single card in a deck
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub front: String,
    pub back: String,
}

/// A deck of cards loaded from a TSV file
#[derive(Debug, Clone)]
pub struct Deck {
    pub name: String,
    /// Folder path relative to the decks directory, `/`-separated, empty at the root
    pub folder: String,
    pub description: Option<String>,
    pub cards: Vec<Card>,
}

impl Deck {
    /// Load a deck from a TSV file under `root`
    /// Format: front<TAB>back
    /// Lines starting with # are comments (or the `# description: ...` directive)
    /// Empty lines are skipped
    pub fn load(root: &Path, path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let folder = folder_of(root, path);

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read deck file: {}", path.display()))?;

        let mut cards = Vec::new();
        let mut description = None;
        let mut fronts = HashSet::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            if let Some(rest) = line.strip_prefix('#') {
                if let Some(text) = rest.trim().strip_prefix("description:") {
                    description = Some(text.trim().to_string());
                }
                continue;
            }

            let Some((front, back)) = line.split_once('\t') else {
                anyhow::bail!(
                    "Invalid line {} in {}: expected front<TAB>back",
                    line_num + 1,
                    path.display()
                );
            };
            let (front, back) = (front.trim(), back.trim());

            if front.is_empty() || back.is_empty() {
                anyhow::bail!(
                    "Empty front or back on line {} in {}",
                    line_num + 1,
                    path.display()
                );
            }

            if !fronts.insert(front.to_string()) {
                anyhow::bail!(
                    "Duplicate card '{}' on line {} in {}",
                    front,
                    line_num + 1,
                    path.display()
                );
            }

            cards.push(Card {
                front: front.to_string(),
                back: back.to_string(),
            });
        }

        Ok(Deck {
            name,
            folder,
            description,
            cards,
        })
    }

    /// Name qualified by folder, unique across the decks directory
    pub fn key(&self) -> String {
        if self.folder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.folder, self.name)
        }
    }
}

fn folder_of(root: &Path, path: &Path) -> String {
    path.parent()
        .and_then(|parent| parent.strip_prefix(root).ok())
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default()
}

/// List deck files in a directory and all of its subfolders
pub fn list_decks(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut decks = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)
            .with_context(|| format!("Failed to read directory: {}", current.display()))?
        {
            let path = entry?.path();

            if path.is_dir() {
                pending.push(path);
            } else if path.is_file() && path.extension().is_some_and(|ext| ext == "tsv") {
                decks.push(path);
            }
        }
    }

    decks.sort();
    Ok(decks)
}
