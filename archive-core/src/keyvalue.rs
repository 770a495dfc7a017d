use common::Result;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, warn};

/// 持久化键值存储（频道季度与计数器）
#[derive(Debug, Default)]
pub struct KeyValueStore {
    path: Option<PathBuf>,
    values: BTreeMap<String, String>,
}

impl KeyValueStore {
    /// 仅内存，不落盘
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// 从文件加载，文件不存在时为空
    pub fn load(path: PathBuf) -> Result<Self> {
        let values = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&content) {
                Ok(values) => values,
                Err(e) => {
                    warn!("Key-value store {:?} is corrupt, starting empty: {}", path, e);
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        debug!("Loaded {} key-value entries", values.len());
        Ok(Self { path: Some(path), values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: &str, value: impl ToString) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.save()
    }

    pub fn delete(&mut self, key: &str) -> Result<()> {
        if self.values.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&self.values)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_persists_across_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keyvalue.json");

        let mut store = KeyValueStore::load(path.clone()).unwrap();
        store.set("alice.stream_number", 7).unwrap();

        let store = KeyValueStore::load(path).unwrap();
        assert_eq!(store.get_u32("alice.stream_number"), Some(7));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keyvalue.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = KeyValueStore::load(path).unwrap();
        assert!(!store.has("anything"));
    }
}
