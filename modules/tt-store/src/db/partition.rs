//! Hash-routed partition files: `<dir>/<prefix>.db`, one Store per prefix.

use std::path::PathBuf;

use sha1::{Digest, Sha1};

use crate::db::store::{IsolationLevel, Schema, Store};
use crate::error::{StoreError, StoreResult};

pub const MAX_PARTITION_SCALE: usize = 40;
const PARTITION_EXT: &str = "db";

/// First `scale` lowercase hex digits of the SHA-1 of `id`.
pub fn partition_name(id: &str, scale: usize) -> String {
    let digest = format!("{:x}", Sha1::digest(id.as_bytes()));
    digest[..scale.min(digest.len())].to_string()
}

#[derive(Debug)]
pub struct PartitionedStore {
    dir: PathBuf,
    scale: usize,
    schema: &'static Schema,
    isolation: IsolationLevel,
}

impl PartitionedStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        scale: usize,
        schema: &'static Schema,
        isolation: IsolationLevel,
    ) -> StoreResult<Self> {
        if !(1..=MAX_PARTITION_SCALE).contains(&scale) {
            return Err(StoreError::InvalidPartitionScale(scale));
        }
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            scale,
            schema,
            isolation,
        })
    }

    pub fn partition_of(&self, id: &str) -> String {
        partition_name(id, self.scale)
    }

    fn path_of(&self, partition: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", partition, PARTITION_EXT))
    }

    /// Whether the partition file has been created yet.
    pub fn exists(&self, partition: &str) -> bool {
        self.path_of(partition).is_file()
    }

    /// Store bound to one partition; the file (and its schema) appear on first use.
    pub fn open(&self, partition: &str) -> StoreResult<Store> {
        Store::new(self.path_of(partition), self.schema, self.isolation)
    }

    /// Existing partition names, sorted.
    pub fn partitions(&self) -> StoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PARTITION_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if stem.len() == self.scale && stem.chars().all(|c| c.is_ascii_hexdigit()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Visit every existing partition in name order, one open connection at a time.
    pub fn for_each_partition<F>(&self, mut f: F) -> StoreResult<()>
    where
        F: FnMut(&str, &Store) -> StoreResult<()>,
    {
        let partitions = self.partitions()?;
        log::debug!(
            "[TT_STORE] Walking {} partitions under {}",
            partitions.len(),
            self.dir.display()
        );
        for partition in partitions {
            let store = self.open(&partition)?;
            let result = f(&partition, &store);
            store.close()?;
            result?;
        }
        Ok(())
    }
}
