use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::HDR_EXTENSIONS;

/// Runtime configuration.
///
/// Built once at startup (from disk or defaults) and passed by reference to
/// every component; nothing reads ad-hoc global state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of decode workers. Defaults to half the hardware threads.
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Edge length of the square thumbnails, in pixels.
    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
    /// Maximum number of thumbnails kept in memory.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// File extensions treated as HDR images (without the dot).
    #[serde(default = "default_extensions")]
    pub recognized_extensions: Vec<String>,
    /// Per-job decode deadline in milliseconds.
    #[serde(default = "default_job_timeout_ms")]
    pub job_timeout_ms: u64,
    /// Print per-job decode durations to the console.
    #[serde(default)]
    pub time_jobs: bool,
}

fn default_worker_pool_size() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (cores / 2).max(1)
}

fn default_thumbnail_size() -> u32 {
    256
}

fn default_cache_capacity() -> usize {
    512
}

fn default_extensions() -> Vec<String> {
    HDR_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

fn default_job_timeout_ms() -> u64 {
    30_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            thumbnail_size: default_thumbnail_size(),
            cache_capacity: default_cache_capacity(),
            recognized_extensions: default_extensions(),
            job_timeout_ms: default_job_timeout_ms(),
            time_jobs: false,
        }
    }
}

impl Config {
    /// Load the config from its default location, writing defaults there on
    /// first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&get_config_path()?)
    }

    /// Load a config file, creating it with defaults if it does not exist.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml_string = toml::to_string_pretty(self)?;
        fs::write(config_path, toml_string)?;
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}

pub fn get_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?;
    Ok(home.join(".hdri-browser").join("config.toml"))
}

fn get_last_folder_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot find home directory"))?;
    Ok(home.join(".hdri-browser").join("last_folder.txt"))
}

/// Folder the artist browsed last session, if any. Missing or unreadable
/// state just means there is nothing to reopen.
pub fn load_last_folder() -> Option<PathBuf> {
    read_last_folder_file(&get_last_folder_path().ok()?)
}

pub fn save_last_folder(folder: &Path) -> Result<()> {
    write_last_folder_file(&get_last_folder_path()?, folder)
}

fn read_last_folder_file(path: &Path) -> Option<PathBuf> {
    let contents = fs::read_to_string(path).ok()?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(PathBuf::from(trimmed))
    }
}

fn write_last_folder_file(path: &Path, folder: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, folder.to_string_lossy().as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.worker_pool_size >= 1);
        assert_eq!(config.thumbnail_size, 256);
        assert!(config.cache_capacity > 0);
        assert_eq!(config.recognized_extensions, vec!["exr", "hdr"]);
        assert!(!config.time_jobs);
    }

    #[test]
    fn first_load_writes_defaults_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.thumbnail_size, 256);

        // Second load reads the file back rather than regenerating it.
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.cache_capacity, config.cache_capacity);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "thumbnail_size = 128\ntime_jobs = true\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.thumbnail_size, 128);
        assert!(config.time_jobs);
        assert_eq!(config.job_timeout_ms, 30_000);
    }

    #[test]
    fn last_folder_round_trips_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("last_folder.txt");

        assert!(read_last_folder_file(&state).is_none());

        write_last_folder_file(&state, Path::new("/library/hdri")).unwrap();
        assert_eq!(
            read_last_folder_file(&state),
            Some(PathBuf::from("/library/hdri"))
        );

        // Whitespace-only state is treated as empty.
        fs::write(&state, "  \n").unwrap();
        assert!(read_last_folder_file(&state).is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.worker_pool_size = 3;
        config.recognized_extensions = vec!["exr".to_string()];
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.worker_pool_size, 3);
        assert_eq!(loaded.recognized_extensions, vec!["exr"]);
    }
}
