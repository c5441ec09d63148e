// Key-value metadata store contract.
//
// The persistent store itself is external; the core only depends on this
// narrow interface. Keys are slash-delimited paths of at most 255 bytes.

use std::collections::BTreeMap;

use parking_lot::Mutex;

use crate::error::{Error, Result};

/// Maximum key length accepted by any backend.
pub const MAX_KEY_LEN: usize = 255;

fn validate_key(key: &str) -> Result<()> {
    if !key.starts_with('/') {
        return Err(Error::Backend(format!("key must start with '/': {key}")));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::Backend(format!(
            "key exceeds {MAX_KEY_LEN} bytes: {key}"
        )));
    }
    if key.len() > 1 && key.ends_with('/') {
        return Err(Error::Backend(format!("trailing slash in key: {key}")));
    }
    if key.contains("//") {
        return Err(Error::Backend(format!("empty path segment in key: {key}")));
    }
    Ok(())
}

/// Operations the core needs from the metadata tree.
///
/// Errors: `create` on a present key yields `KeyExists`; `get`, `set` and
/// `delete` on an absent key yield `NoSuchKey`; anything else is
/// `Backend`.
pub trait KvStore: Send + Sync {
    fn create(&self, key: &str, value: &str) -> Result<()>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn get(&self, key: &str) -> Result<String>;
    /// Immediate child segment names under `key`, sorted.
    fn get_children(&self, key: &str) -> Result<Vec<String>>;
    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }
}

/// In-memory implementation backing tests and single-process deployments.
pub struct MemKvStore {
    map: Mutex<BTreeMap<String, String>>,
}

impl MemKvStore {
    pub fn new() -> Self {
        MemKvStore {
            map: Mutex::new(BTreeMap::new()),
        }
    }
}

impl Default for MemKvStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemKvStore {
    fn create(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        let mut map = self.map.lock();
        if map.contains_key(key) {
            return Err(Error::KeyExists(key.to_string()));
        }
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        validate_key(key)?;
        self.map.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<String> {
        validate_key(key)?;
        self.map
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NoSuchKey(key.to_string()))
    }

    fn get_children(&self, key: &str) -> Result<Vec<String>> {
        validate_key(key)?;
        let prefix = if key == "/" {
            "/".to_string()
        } else {
            format!("{key}/")
        };
        let map = self.map.lock();
        let mut children: Vec<String> = map
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                let seg = rest.split('/').next()?;
                if seg.is_empty() {
                    None
                } else {
                    Some(seg.to_string())
                }
            })
            .collect();
        children.dedup();
        Ok(children)
    }

    fn delete(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.map
            .lock()
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| Error::NoSuchKey(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_get() {
        let kv = MemKvStore::new();
        kv.create("/DBS/sky", "READY").unwrap();
        assert_eq!(kv.get("/DBS/sky").unwrap(), "READY");
        assert!(matches!(
            kv.create("/DBS/sky", "AGAIN"),
            Err(Error::KeyExists(_))
        ));
    }

    #[test]
    fn get_missing_is_no_such_key() {
        let kv = MemKvStore::new();
        assert!(matches!(kv.get("/nope"), Err(Error::NoSuchKey(_))));
        assert!(matches!(kv.delete("/nope"), Err(Error::NoSuchKey(_))));
    }

    #[test]
    fn children_are_sorted_and_deduped() {
        let kv = MemKvStore::new();
        kv.set("/DBS/sky/TABLES/Object", "{}").unwrap();
        kv.set("/DBS/sky/TABLES/Source", "{}").unwrap();
        kv.set("/DBS/sky/TABLES/Object/flags", "1").unwrap();
        let kids = kv.get_children("/DBS/sky/TABLES").unwrap();
        assert_eq!(kids, vec!["Object".to_string(), "Source".to_string()]);
    }

    #[test]
    fn key_validation() {
        let kv = MemKvStore::new();
        assert!(kv.set("no-slash", "x").is_err());
        assert!(kv.set("/trailing/", "x").is_err());
        assert!(kv.set("/a//b", "x").is_err());
        let long = format!("/{}", "k".repeat(MAX_KEY_LEN));
        assert!(kv.set(&long, "x").is_err());
    }
}
