use std::collections::HashMap;

use crate::{Error, Result};

/// String key-value storage behind a durable tier.
///
/// Values are whole serialized tiers; backends never interpret them.
pub trait KvBackend: Send {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&mut self, key: &str, value: &str) -> Result<()>;
    fn remove(&mut self, key: &str) -> Result<()>;
    fn clear(&mut self) -> Result<()>;
}

/// In-process backend with an optional byte quota.
///
/// The quota counts key and value bytes across all entries, which is how
/// browser-style storage accounts for capacity.
#[derive(Debug, Default, Clone)]
pub struct MemoryKv {
    entries: HashMap<String, String>,
    quota: Option<usize>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: HashMap::new(),
            quota: Some(quota),
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KvBackend for MemoryKv {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(quota) = self.quota {
            let replaced = self.entries.get(key).map_or(0, |v| key.len() + v.len());
            let needed = self.used_bytes() - replaced + key.len() + value.len();
            if needed > quota {
                return Err(Error::QuotaExceeded { needed, quota });
            }
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_kv_read_write_remove() {
        let mut kv = MemoryKv::new();
        assert_eq!(kv.read("a").unwrap(), None);

        kv.write("a", "1").unwrap();
        kv.write("a", "2").unwrap();
        assert_eq!(kv.read("a").unwrap().as_deref(), Some("2"));
        assert_eq!(kv.len(), 1);

        kv.remove("a").unwrap();
        assert!(kv.is_empty());
    }

    #[test]
    fn test_quota_rejects_oversized_write() {
        let mut kv = MemoryKv::with_quota(10);
        kv.write("k", "12345").unwrap();

        let err = kv.write("other", "123456").unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { needed: 17, quota: 10 }));
        assert_eq!(kv.read("other").unwrap(), None);

        // Replacing an entry only counts the difference.
        kv.write("k", "123456789").unwrap();
        assert_eq!(kv.used_bytes(), 10);
    }

    #[test]
    fn test_clear() {
        let mut kv = MemoryKv::new();
        kv.write("a", "1").unwrap();
        kv.write("b", "2").unwrap();
        kv.clear().unwrap();
        assert!(kv.is_empty());
    }
}
