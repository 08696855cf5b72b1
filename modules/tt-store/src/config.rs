use std::env;
use std::path::PathBuf;

use serde::Serialize;

use crate::db::IsolationLevel;

pub const PROFILES_DB_FILENAME: &str = "tt_profiles.db";
pub const MAIN_DB_FILENAME: &str = "tt_main.db";
pub const TWEETS_DIRNAME: &str = "tweets";

const DEFAULT_PARTITION_SCALE: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Number of leading hex digits used to route tweets to partition files
    pub partition_scale: usize,
    pub isolation_level: IsolationLevel,
}

impl Config {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            partition_scale: DEFAULT_PARTITION_SCALE,
            isolation_level: IsolationLevel::Deferred,
        }
    }

    pub fn from_env() -> Self {
        let data_dir = env::var("TT_DATA_DIR").unwrap_or_else(|_| "./var".to_string());

        let partition_scale = match env::var("TT_PARTITION_SCALE") {
            Ok(raw) => match raw.parse::<usize>() {
                Ok(scale) => scale,
                Err(_) => {
                    log::warn!(
                        "[TT_STORE] TT_PARTITION_SCALE={} is not a number, using {}",
                        raw,
                        DEFAULT_PARTITION_SCALE
                    );
                    DEFAULT_PARTITION_SCALE
                }
            },
            Err(_) => DEFAULT_PARTITION_SCALE,
        };

        let isolation_level = match env::var("TT_ISOLATION_LEVEL") {
            Ok(raw) => IsolationLevel::from_str(&raw).unwrap_or_else(|| {
                log::warn!(
                    "[TT_STORE] Unknown TT_ISOLATION_LEVEL={}, using deferred",
                    raw
                );
                IsolationLevel::Deferred
            }),
            Err(_) => IsolationLevel::Deferred,
        };

        Self {
            data_dir: PathBuf::from(data_dir),
            partition_scale,
            isolation_level,
        }
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.data_dir.join(PROFILES_DB_FILENAME)
    }

    pub fn main_path(&self) -> PathBuf {
        self.data_dir.join(MAIN_DB_FILENAME)
    }

    pub fn tweets_dir(&self) -> PathBuf {
        self.data_dir.join(TWEETS_DIRNAME)
    }
}
