use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use log::debug;

use crate::error::{EngineError, Result};
use crate::metrics;
use crate::store::IndexRecord;
use crate::utils;

/// 已加载索引的缓存，在整个进程生命周期内有效
///
/// 读取时共享，写入时整体替换对应的 `Arc`：正在进行的搜索继续使用旧的记录，
/// 之后的搜索只会看到完整写入的新记录。
#[derive(Default)]
pub struct IndexCache {
    records: RwLock<HashMap<PathBuf, Arc<IndexRecord>>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &Path) -> PathBuf {
        utils::absolute(path)
    }

    /// 读取索引，首次成功读取后不再访问磁盘
    pub fn load(&self, path: impl AsRef<Path>) -> Result<Arc<IndexRecord>> {
        let key = Self::key(path.as_ref());
        if let Some(record) = self.get(&key) {
            debug!("命中索引缓存 {}", key.display());
            return Ok(record);
        }

        let record = IndexRecord::load(&key).map_err(|e| EngineError::unavailable(&key, e))?;
        metrics::inc_index_loads();

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        // 并发读取同一个索引时，保留先写入缓存的那一份
        let record = records.entry(key).or_insert_with(|| Arc::new(record));
        Ok(record.clone())
    }

    /// 写入索引文件，并替换缓存中的记录
    pub fn store(&self, path: impl AsRef<Path>, record: IndexRecord) -> Result<Arc<IndexRecord>> {
        let key = Self::key(path.as_ref());
        record.save(&key)?;
        let record = Arc::new(record);
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, record.clone());
        Ok(record)
    }

    /// 仅当缓存中已有该索引时返回
    pub fn get(&self, path: impl AsRef<Path>) -> Option<Arc<IndexRecord>> {
        let key = Self::key(path.as_ref());
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned()
    }

    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        self.get(path).is_some()
    }

    /// 从缓存中移除，下次读取时重新访问磁盘
    pub fn invalidate(&self, path: impl AsRef<Path>) {
        let key = Self::key(path.as_ref());
        self.records.write().unwrap_or_else(PoisonError::into_inner).remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::extractor::Features;

    fn record(n: u64) -> IndexRecord {
        let mut record = IndexRecord::new("dHash (structure)");
        for i in 0..n {
            record.entries.insert(format!("/{i}.jpg"), Features::Hash(i));
        }
        record
    }

    #[test]
    fn test_load_is_cached() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("index.bin");
        record(2).save(&path)?;

        let cache = IndexCache::new();
        assert!(!cache.contains(&path));
        let first = cache.load(&path)?;
        assert!(cache.contains(&path));

        // 文件被删除后仍然返回缓存中的记录
        fs::remove_file(&path)?;
        let second = cache.load(&path)?;
        assert!(Arc::ptr_eq(&first, &second));
        Ok(())
    }

    #[test]
    fn test_store_replaces() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(".index").join("index.bin");
        let cache = IndexCache::new();

        cache.store(&path, record(1))?;
        let old = cache.load(&path)?;
        cache.store(&path, record(3))?;
        let new = cache.load(&path)?;

        // 旧的引用不受影响
        assert_eq!(old.len(), 1);
        assert_eq!(new.len(), 3);
        assert_eq!(IndexRecord::load(&path)?.len(), 3);
        Ok(())
    }

    #[test]
    fn test_load_errors_are_unavailable() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let cache = IndexCache::new();

        let missing = dir.path().join("missing.bin");
        match cache.load(&missing) {
            Err(EngineError::IndexUnavailable { source, .. }) => {
                assert!(matches!(*source, EngineError::IndexNotFound(_)))
            }
            other => panic!("unexpected {other:?}"),
        }

        let corrupt = dir.path().join("corrupt.bin");
        fs::write(&corrupt, b"garbage")?;
        match cache.load(&corrupt) {
            Err(EngineError::IndexUnavailable { source, .. }) => {
                assert!(matches!(*source, EngineError::IndexCorrupt { .. }))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!cache.contains(&corrupt));
        Ok(())
    }

    #[test]
    fn test_invalidate() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("index.bin");
        record(1).save(&path)?;

        let cache = IndexCache::new();
        cache.load(&path)?;
        record(4).save(&path)?;
        assert_eq!(cache.load(&path)?.len(), 1);
        cache.invalidate(&path);
        assert_eq!(cache.load(&path)?.len(), 4);
        Ok(())
    }
}
