use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::records::ImageRecord;
use crate::settings;

const FAVORITES_FILE_NAME: &str = "favorites.json";
const MAX_FAVORITES: usize = 50;

#[derive(Debug, Default, Serialize, Deserialize)]
struct FavoritesFile {
    #[serde(default)]
    favorites: Vec<ImageRecord>,
}

/// Locally stored favorite pages, newest first, capped at 50 entries.
/// Persisted under the home configuration directory.
#[derive(Debug, Default)]
pub struct Favorites {
    entries: Vec<ImageRecord>,
}

impl Favorites {
    /// A corrupt or missing file yields an empty list rather than an error.
    pub fn load() -> Self {
        let Some(path) = favorites_path() else {
            return Self::default();
        };
        let Ok(content) = fs::read_to_string(&path) else {
            return Self::default();
        };
        let parsed: FavoritesFile = serde_json::from_str(&content).unwrap_or_default();
        Self {
            entries: parsed.favorites,
        }
    }

    pub fn entries(&self) -> &[ImageRecord] {
        &self.entries
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn add(&mut self, record: ImageRecord) -> Result<()> {
        if self.contains(&record.id) {
            return Ok(());
        }
        self.entries.insert(0, record);
        self.entries.truncate(MAX_FAVORITES);
        self.save()
    }

    pub fn remove(&mut self, id: &str) -> Result<bool> {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        if let Some(path) = favorites_path() {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let Some(path) = favorites_path() else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = FavoritesFile {
            favorites: self.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
    }
}

fn favorites_path() -> Option<PathBuf> {
    settings::home_dir().map(|home| home.join(FAVORITES_FILE_NAME))
}
