// Worker resource naming.
//
// A resource unit names the target of one dispatched message: a chunk of a
// database on some worker, a result blob, or a worker-scoped directive
// endpoint. Both the frontend and the worker parse and format these paths,
// so the grammar lives here. Paths are case-sensitive and a trailing slash
// is invalid.

use std::collections::BTreeMap;
use std::fmt;

use crate::global::{ChunkId, DUMMY_CHUNK};

const PATH_SEP: char = '/';
const VAR_SEP: char = '?';
const VAR_DELIM: char = '&';

/// Kind of resource a path names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitType {
    /// Unparseable or unrecognized path.
    Garbage,
    /// `/chk/<db>/<chunk>` -- a chunk query target.
    DbChunk,
    /// `/q/<db>/<chunk>` -- legacy chunk query form.
    CQuery,
    /// `/result/<hash>` -- a result pull target.
    Result,
    /// `/worker/<id>` -- a worker-scoped directive endpoint.
    Worker,
}

impl UnitType {
    /// Path prefix element for this unit type.
    pub fn prefix(self) -> &'static str {
        match self {
            UnitType::DbChunk => "chk",
            UnitType::CQuery => "q",
            UnitType::Result => "result",
            UnitType::Worker => "worker",
            UnitType::Garbage => "",
        }
    }
}

/// A parsed resource path.
///
/// Value type: build one from a path string or via the `set_as_*` methods,
/// then treat it as immutable once the owning job has been dispatched.
/// Key-value specifiers (`?k=v&flag`) are parsed and retrievable but never
/// contribute to routing, and `path()` does not regenerate them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUnit {
    unit_type: UnitType,
    db: String,
    chunk: ChunkId,
    hash_name: String,
    vars: BTreeMap<String, String>,
}

impl Default for ResourceUnit {
    fn default() -> Self {
        ResourceUnit {
            unit_type: UnitType::Garbage,
            db: String::new(),
            chunk: -1,
            hash_name: String::new(),
            vars: BTreeMap::new(),
        }
    }
}

impl ResourceUnit {
    /// Parse a path. Ill-formed paths yield a `Garbage` unit rather than an
    /// error; dispatch layers reject garbage explicitly.
    pub fn from_path(path: &str) -> Self {
        let mut unit = ResourceUnit::default();
        unit.set_from_path(path);
        unit
    }

    pub fn unit_type(&self) -> UnitType {
        self.unit_type
    }

    /// Database name, for `DbChunk` and `CQuery` units.
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Chunk number, for `DbChunk` and `CQuery` units.
    pub fn chunk(&self) -> ChunkId {
        self.chunk
    }

    /// Hash name for `Result` units, worker id for `Worker` units.
    pub fn hash_name(&self) -> &str {
        &self.hash_name
    }

    /// Lookup an extended path variable (`?k=v` syntax).
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// The constructed path. Round-trips through `from_path` for every
    /// non-garbage unit.
    pub fn path(&self) -> String {
        let prefix = self.unit_type.prefix();
        match self.unit_type {
            UnitType::Garbage => format!("{PATH_SEP}GARBAGE"),
            UnitType::DbChunk | UnitType::CQuery => {
                format!("{PATH_SEP}{prefix}{PATH_SEP}{}{PATH_SEP}{}", self.db, self.chunk)
            }
            UnitType::Result | UnitType::Worker => {
                format!("{PATH_SEP}{prefix}{PATH_SEP}{}", self.hash_name)
            }
        }
    }

    /// Shorthand for the path of a database/chunk resource.
    pub fn make_path(chunk: ChunkId, db: &str) -> String {
        format!("{PATH_SEP}chk{PATH_SEP}{db}{PATH_SEP}{chunk}")
    }

    /// Shorthand for the path of a worker-specific resource.
    pub fn make_worker_path(id: &str) -> String {
        format!("{PATH_SEP}worker{PATH_SEP}{id}")
    }

    pub fn set_as_db_chunk(&mut self, db: &str, chunk: ChunkId) {
        self.unit_type = UnitType::DbChunk;
        self.db = db.to_string();
        self.chunk = chunk;
        self.hash_name.clear();
    }

    /// Legacy chunk-query form; kept for wire compatibility.
    pub fn set_as_cquery(&mut self, db: &str, chunk: ChunkId) {
        self.unit_type = UnitType::CQuery;
        self.db = db.to_string();
        self.chunk = chunk;
        self.hash_name.clear();
    }

    pub fn set_as_result(&mut self, hash_name: &str) {
        self.unit_type = UnitType::Result;
        self.hash_name = hash_name.to_string();
        self.db.clear();
        self.chunk = -1;
    }

    pub fn set_as_worker(&mut self, id: &str) {
        self.unit_type = UnitType::Worker;
        self.hash_name = id.to_string();
        self.db.clear();
        self.chunk = -1;
    }

    /// Convenience constructor for an unpartitioned query target.
    pub fn db_chunk(db: &str, chunk: Option<ChunkId>) -> Self {
        let mut unit = ResourceUnit::default();
        unit.set_as_db_chunk(db, chunk.unwrap_or(DUMMY_CHUNK));
        unit
    }

    /// Add an optional specifier, as would be parsed from `?key`.
    pub fn add_key(&mut self, key: &str) {
        self.vars.insert(key.to_string(), String::new());
    }

    /// Add an optional specifier with a value, as parsed from `?key=val`.
    pub fn add_key_value(&mut self, key: &str, val: &str) {
        self.vars.insert(key.to_string(), val.to_string());
    }

    fn set_from_path(&mut self, path: &str) {
        self.unit_type = UnitType::Garbage;
        let Some(rest) = path.strip_prefix(PATH_SEP) else {
            return;
        };
        let mut segments = rest.split(PATH_SEP);
        let prefix = match segments.next() {
            Some(p) if !p.is_empty() => p,
            _ => return,
        };
        match prefix {
            "chk" | "q" => {
                let Some(db) = segments.next() else { return };
                let Some(leaf) = segments.next() else { return };
                if db.is_empty() || segments.next().is_some() {
                    return;
                }
                let leaf = self.ingest_leaf_keys(leaf);
                let Ok(chunk) = leaf.parse::<ChunkId>() else {
                    return;
                };
                if chunk < 0 {
                    return;
                }
                self.db = db.to_string();
                self.chunk = chunk;
                self.unit_type = if prefix == "chk" {
                    UnitType::DbChunk
                } else {
                    UnitType::CQuery
                };
            }
            "result" | "worker" => {
                let Some(leaf) = segments.next() else { return };
                if segments.next().is_some() {
                    return;
                }
                let leaf = self.ingest_leaf_keys(leaf);
                if leaf.is_empty() {
                    return;
                }
                self.hash_name = leaf;
                self.unit_type = if prefix == "result" {
                    UnitType::Result
                } else {
                    UnitType::Worker
                };
            }
            _ => {}
        }
    }

    /// Strip and record `?k=v&flag` specifiers from the leaf segment,
    /// returning the bare leaf.
    fn ingest_leaf_keys(&mut self, leaf: &str) -> String {
        match leaf.split_once(VAR_SEP) {
            None => leaf.to_string(),
            Some((bare, keys)) => {
                for entry in keys.split(VAR_DELIM) {
                    if entry.is_empty() {
                        continue;
                    }
                    match entry.split_once('=') {
                        Some((k, v)) => self.add_key_value(k, v),
                        None => self.add_key(entry),
                    }
                }
                bare.to_string()
            }
        }
    }
}

impl fmt::Display for ResourceUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path())
    }
}
