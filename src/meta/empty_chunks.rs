// Per-database empty-chunk tracking.
//
// A chunk listed in the database's empty-chunks file holds no rows, so the
// planner skips it entirely. Lists are loaded lazily from
// `empty_<sanitized-db>.txt` in the configured directory, falling back to a
// single shared file, and cached until flushed.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::global::string_util::sanitize_name;
use crate::global::ChunkId;

pub struct EmptyChunks {
    path: PathBuf,
    fallback_file: PathBuf,
    sets: Mutex<HashMap<String, Arc<HashSet<ChunkId>>>>,
}

fn make_filename(db: &str) -> String {
    format!("empty_{}.txt", sanitize_name(db))
}

fn populate(path: &Path, fallback: &Path, db: &str) -> Result<HashSet<ChunkId>> {
    let best = path.join(make_filename(db));
    let (file, text) = match std::fs::read_to_string(&best) {
        Ok(text) => (best, text),
        // On error, try the shared fallback file.
        Err(_) => match std::fs::read_to_string(fallback) {
            Ok(text) => (fallback.to_path_buf(), text),
            Err(_) => {
                return Err(Error::Config(format!(
                    "no such empty chunks file: {} or {}",
                    best.display(),
                    fallback.display()
                )))
            }
        },
    };
    debug!(db, file = %file.display(), "reading empty chunks");
    let mut set = HashSet::new();
    for token in text.split_whitespace() {
        let chunk: ChunkId = token.parse().map_err(|_| {
            Error::Config(format!(
                "bad chunk number {:?} in {}",
                token,
                file.display()
            ))
        })?;
        set.insert(chunk);
    }
    Ok(set)
}

impl EmptyChunks {
    pub fn new(path: impl Into<PathBuf>, fallback_file: impl Into<PathBuf>) -> Self {
        EmptyChunks {
            path: path.into(),
            fallback_file: fallback_file.into(),
            sets: Mutex::new(HashMap::new()),
        }
    }

    /// The full empty-chunk set for `db`, loading and caching on first use.
    pub fn get_empty(&self, db: &str) -> Result<Arc<HashSet<ChunkId>>> {
        let mut sets = self.sets.lock();
        if let Some(set) = sets.get(db) {
            return Ok(Arc::clone(set));
        }
        let set = Arc::new(populate(&self.path, &self.fallback_file, db)?);
        sets.insert(db.to_string(), Arc::clone(&set));
        Ok(set)
    }

    /// True if `chunk` holds no rows for `db`. Deterministic for a given
    /// file contents.
    pub fn is_empty(&self, db: &str, chunk: ChunkId) -> Result<bool> {
        Ok(self.get_empty(db)?.contains(&chunk))
    }

    /// Drop the cached set for `db`, or for every database when `None`.
    /// Backs the `FLUSH QSERV_CHUNKS_CACHE` directive.
    pub fn clear_cache(&self, db: Option<&str>) {
        let mut sets = self.sets.lock();
        match db {
            Some(db) => {
                debug!(db, "clearing empty chunks cache");
                sets.remove(db);
            }
            None => {
                debug!("clearing empty chunks cache for all databases");
                sets.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn fixture() -> (TempDir, EmptyChunks) {
        let dir = TempDir::new().unwrap();
        write_file(&dir, "empty_TestOne.txt", "1\n2\n3\n4\n");
        write_file(&dir, "empty_TestTwo.txt", "11 22 33\n44\n");
        write_file(&dir, "emptyChunks.txt", "7\n8\n9\n");
        let fallback = dir.path().join("emptyChunks.txt");
        let ec = EmptyChunks::new(dir.path(), fallback);
        (dir, ec)
    }

    #[test]
    fn per_db_files() {
        let (_dir, ec) = fixture();
        assert!(ec.is_empty("TestOne", 3).unwrap());
        assert!(!ec.is_empty("TestOne", 11).unwrap());
        assert!(ec.is_empty("TestTwo", 44).unwrap());
        assert_eq!(ec.get_empty("TestOne").unwrap().len(), 4);
    }

    #[test]
    fn fallback_for_unknown_db() {
        let (_dir, ec) = fixture();
        // No empty_Other.txt: the shared fallback applies.
        assert!(ec.is_empty("Other", 7).unwrap());
        assert!(!ec.is_empty("Other", 1).unwrap());
    }

    #[test]
    fn missing_everything_is_config_error() {
        let dir = TempDir::new().unwrap();
        let ec = EmptyChunks::new(dir.path(), dir.path().join("nope.txt"));
        assert!(ec.get_empty("AnyDb").is_err());
    }

    #[test]
    fn cache_flush_rereads_file() {
        let (dir, ec) = fixture();
        assert!(ec.is_empty("TestOne", 1).unwrap());
        write_file(&dir, "empty_TestOne.txt", "99\n");
        // Still cached.
        assert!(ec.is_empty("TestOne", 1).unwrap());
        ec.clear_cache(Some("TestOne"));
        assert!(!ec.is_empty("TestOne", 1).unwrap());
        assert!(ec.is_empty("TestOne", 99).unwrap());
    }
}
