//! SQLite row store behind a personal Twitter archive.

pub mod archive;
pub mod config;
pub mod db;
pub mod error;

pub use archive::Archive;
pub use config::Config;
pub use error::{StoreError, StoreResult};
