//! On-disk intruder registry.
//!
//! `intruders.json` in the database directory indexes every registered
//! intruder with the path of its stored image and its face embedding. The
//! index is rewritten whole (temp file + rename) on each registration.
//! Stored images are never overwritten.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{GuardError, Result};
use crate::types::{Embedding, Frame};

const INDEX_FILE: &str = "intruders.json";
const ID_PREFIX: &str = "INTRUDER_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntruderRecord {
    pub id: String,
    pub image_path: PathBuf,
    pub embedding: Embedding,
    pub registered_at: DateTime<Local>,
}

pub struct IntruderRegistry {
    dir: PathBuf,
    records: Vec<IntruderRecord>,
}

impl IntruderRegistry {
    /// Load the index from `dir`, creating the directory if needed.
    /// A corrupt index is moved aside to `intruders.json.corrupt` and the
    /// registry starts empty.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let index = dir.join(INDEX_FILE);
        let records = if index.exists() {
            let raw = fs::read_to_string(&index)?;
            match serde_json::from_str::<Vec<IntruderRecord>>(&raw) {
                Ok(records) => records,
                Err(e) => {
                    let aside = dir.join(format!("{}.corrupt", INDEX_FILE));
                    warn!(path = %index.display(), moved_to = %aside.display(), "unreadable intruder index: {}", e);
                    fs::rename(&index, &aside).map_err(|e| {
                        GuardError::Registry(format!("cannot move aside {}: {}", index.display(), e))
                    })?;
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        info!(count = records.len(), "intruder registry loaded");
        Ok(Self {
            dir: dir.to_path_buf(),
            records,
        })
    }

    pub fn records(&self) -> &[IntruderRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&IntruderRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn image_path(&self, id: &str) -> Option<&Path> {
        self.get(id).map(|r| r.image_path.as_path())
    }

    /// One past the highest number in the index or among stored images, so
    /// images left behind by a lost index are not reused.
    fn next_id(&self) -> String {
        let stored = fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str().and_then(id_number));
        let highest = self
            .records
            .iter()
            .filter_map(|r| id_number(&r.id))
            .chain(stored)
            .max()
            .unwrap_or(0);
        format!("{}{:03}", ID_PREFIX, highest + 1)
    }

    /// Store the frame and embedding under a fresh `INTRUDER_NNN` id.
    pub fn register(&mut self, frame: &Frame, embedding: &Embedding) -> Result<IntruderRecord> {
        let id = self.next_id();
        let image_path = self
            .dir
            .join(format!("{}_{}.jpg", id, Local::now().format("%Y%m%d_%H%M%S")));
        if image_path.exists() {
            return Err(GuardError::Registry(format!(
                "refusing to overwrite {}",
                image_path.display()
            )));
        }
        frame
            .save(&image_path)
            .map_err(|e| GuardError::Registry(format!("cannot store image for {}: {}", id, e)))?;

        let record = IntruderRecord {
            id: id.clone(),
            image_path,
            embedding: embedding.clone(),
            registered_at: Local::now(),
        };
        self.records.push(record.clone());
        if let Err(e) = self.persist() {
            self.records.pop();
            return Err(e);
        }
        info!(id = %id, total = self.records.len(), "\u{1f4be} intruder registered");
        Ok(record)
    }

    fn persist(&self) -> Result<()> {
        let index = self.dir.join(INDEX_FILE);
        let tmp = self.dir.join(format!("{}.tmp", INDEX_FILE));
        let json = serde_json::to_string_pretty(&self.records)?;
        fs::write(&tmp, json)
            .and_then(|_| fs::rename(&tmp, &index))
            .map_err(|e| GuardError::Registry(format!("cannot write {}: {}", index.display(), e)))
    }
}

/// `INTRUDER_007` and `INTRUDER_007_20240101_120000.jpg` both give 7.
fn id_number(name: &str) -> Option<u32> {
    let rest = name.strip_prefix(ID_PREFIX)?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
