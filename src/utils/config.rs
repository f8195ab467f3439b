use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use tracing::info;
use walkdir::WalkDir;

const DATA_DIR_KEY: &str = "PROMPT_INDEX_DATA_DIR";
const IMAGES_DIR_KEY: &str = "PROMPT_INDEX_IMAGES_DIR";
const DB_KEY: &str = "PROMPT_INDEX_DB";

const RESULTS_FILE: &str = "results.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub images_dir: PathBuf,
    pub db_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self::for_data_dir(PathBuf::from("data"))
    }
}

impl Settings {
    /// Layout used by the scraper: images next to the data directory.
    fn for_data_dir(data_dir: PathBuf) -> Self {
        let root = data_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self {
            images_dir: root.join("images").join("medium"),
            db_path: data_dir.join("gallery.db"),
            data_dir,
        }
    }

    pub fn results(&self) -> PathBuf {
        self.data_dir.join(RESULTS_FILE)
    }

    pub fn style_map(&self) -> PathBuf {
        self.data_dir.join("style_prompts.json")
    }

    pub fn tokens_output(&self) -> PathBuf {
        self.data_dir.join("tokens.json")
    }

    pub fn grouped_output(&self) -> PathBuf {
        self.data_dir.join("grouped.json")
    }

    pub fn groups_dir(&self) -> PathBuf {
        groups_dir_for(&self.images_dir)
    }
}

/// Per-group folders live beside the images directory.
pub fn groups_dir_for(images_dir: &Path) -> PathBuf {
    images_dir
        .parent()
        .map(|p| p.join("groups"))
        .unwrap_or_else(|| PathBuf::from("groups"))
}

/// Main entry point to get settings.
/// Checks .env first, then looks for a nearby results.json.
pub fn get_settings() -> Result<Settings> {
    let env_path = Path::new(".env");

    if env_path.exists() {
        if let Ok(settings) = load_from_env(env_path) {
            info!("Loaded settings from .env");
            return Ok(settings);
        }
    }

    match find_file(RESULTS_FILE, 3) {
        Ok(results) => {
            let data_dir = results
                .parent()
                .map(Path::to_path_buf)
                .ok_or_else(|| anyhow!("{:?} has no parent directory", results))?;
            info!("Found {} in {:?}", RESULTS_FILE, data_dir);
            let settings = Settings::for_data_dir(data_dir);
            save_to_env(env_path, &settings)?;
            info!("Saved settings to .env");
            Ok(settings)
        }
        Err(_) => {
            info!("No .env and no {} nearby, using defaults", RESULTS_FILE);
            Ok(Settings::default())
        }
    }
}

fn find_file(filename: &str, max_depth: usize) -> Result<PathBuf> {
    let root = std::env::current_dir()?;

    // Scraper layouts keep data/ either below the working directory or beside it.
    let search_roots = std::iter::once(root.as_path()).chain(root.parent());
    for dir in search_roots {
        let found = WalkDir::new(dir)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
            .find(|e| e.file_type().is_file() && e.file_name() == filename);
        if let Some(entry) = found {
            return Ok(entry.path().to_path_buf());
        }
    }

    Err(anyhow!("Could not find file '{}' in nearby directories.", filename))
}

fn load_from_env(path: &Path) -> Result<Settings> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut data_dir = None;
    let mut images_dir = None;
    let mut db_path = None;

    for line in reader.lines() {
        let line = line?;
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                DATA_DIR_KEY => data_dir = Some(PathBuf::from(value.trim())),
                IMAGES_DIR_KEY => images_dir = Some(PathBuf::from(value.trim())),
                DB_KEY => db_path = Some(PathBuf::from(value.trim())),
                _ => {}
            }
        }
    }

    let data_dir = data_dir.ok_or_else(|| anyhow!("Incomplete .env file"))?;
    let defaults = Settings::for_data_dir(data_dir);
    Ok(Settings {
        images_dir: images_dir.unwrap_or(defaults.images_dir),
        db_path: db_path.unwrap_or(defaults.db_path),
        data_dir: defaults.data_dir,
    })
}

fn save_to_env(path: &Path, settings: &Settings) -> Result<()> {
    let mut file = File::create(path).context("Failed to create .env file")?;
    writeln!(file, "{}={}", DATA_DIR_KEY, settings.data_dir.display())?;
    writeln!(file, "{}={}", IMAGES_DIR_KEY, settings.images_dir.display())?;
    writeln!(file, "{}={}", DB_KEY, settings.db_path.display())?;
    Ok(())
}
