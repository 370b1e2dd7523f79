//! 建立与更新索引

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info};

use crate::cache::IndexCache;
use crate::error::{EngineError, Result};
use crate::extractor::{FeatureExtractor, extract_guarded};
use crate::metrics;
use crate::store::{IndexRecord, default_index_path};
use crate::utils;
use crate::worker::CancelFlag;

/// 一次索引任务的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexOutcome {
    /// 索引已写入给定路径
    Completed(PathBuf),
    Cancelled,
}

/// 对目录中所有图片建立索引
pub fn build(folder: impl AsRef<Path>, extractor: &dyn FeatureExtractor) -> Result<IndexRecord> {
    let record = IndexRecord::new(extractor.name());
    let outcome = extend(record, folder.as_ref(), extractor, &CancelFlag::new(), &mut |_| {})?;
    Ok(outcome.unwrap_or_else(|| IndexRecord::new(extractor.name())))
}

/// 只为 `existing` 中还没有的图片提取特征，已有的记录保持不变
///
/// 文件内容在第一次索引后发生变化时不会被重新提取。
/// `existing` 由其他提取器生成时返回 [`EngineError::IndexCorrupt`]。
pub fn merge_incremental(
    existing: &IndexRecord,
    folder: impl AsRef<Path>,
    extractor: &dyn FeatureExtractor,
) -> Result<IndexRecord> {
    let folder = folder.as_ref();
    check_extractor(existing, extractor, folder)?;
    let record = existing.clone();
    let outcome = extend(record, folder, extractor, &CancelFlag::new(), &mut |_| {})?;
    Ok(outcome.unwrap_or_else(|| existing.clone()))
}

fn check_extractor(record: &IndexRecord, extractor: &dyn FeatureExtractor, path: &Path) -> Result<()> {
    if record.extractor == extractor.name() {
        return Ok(());
    }
    Err(EngineError::IndexCorrupt {
        path: path.to_path_buf(),
        reason: format!("索引由 {} 生成，而不是 {}", record.extractor, extractor.name()),
    })
}

/// 把目录中尚未出现在 `record` 中的图片加入记录
///
/// 观察到取消请求时返回 `Ok(None)`，此后不再报告进度
fn extend(
    mut record: IndexRecord,
    folder: &Path,
    extractor: &dyn FeatureExtractor,
    cancel: &CancelFlag,
    progress: &mut dyn FnMut(u8),
) -> Result<Option<IndexRecord>> {
    let images = utils::find_images(folder);
    if images.is_empty() {
        return Err(EngineError::NoImagesFound(folder.to_path_buf()));
    }

    let total = images.len();
    let mut added = 0;
    for (i, path) in images.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("索引任务已取消，已处理 {i}/{total}");
            return Ok(None);
        }
        let key = utils::path_key(path);
        if !record.entries.contains_key(&key) {
            if let Some(features) = extract_guarded(extractor, path) {
                record.entries.insert(key, features);
                added += 1;
            } else {
                debug!("跳过没有特征的图片: {}", path.display());
            }
        }
        if cancel.is_cancelled() {
            info!("索引任务已取消，已处理 {}/{total}", i + 1);
            return Ok(None);
        }
        progress(utils::percent(i + 1, total));
    }

    record.touch();
    metrics::inc_indexed_images(added);
    info!("新增 {added} 张图片，索引共 {} 张", record.len());
    Ok(Some(record))
}

/// 一次后台索引任务的描述
pub struct Indexer {
    folder: PathBuf,
    extractor: Arc<dyn FeatureExtractor>,
    output: PathBuf,
    update: bool,
}

impl Indexer {
    pub fn new(folder: impl Into<PathBuf>, extractor: Arc<dyn FeatureExtractor>) -> Self {
        let folder = folder.into();
        let output = default_index_path(&folder, extractor.name());
        Self { folder, extractor, output, update: false }
    }

    /// 索引文件路径，默认为目录下的 `.index/image_index_<提取器名>.bin`
    pub fn output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = output.into();
        self
    }

    /// 在已有索引的基础上只添加新的图片
    pub fn update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// 执行索引任务
    ///
    /// 完成后写入索引文件并替换缓存；被取消时不写入任何文件。
    pub fn run(
        self,
        cache: &IndexCache,
        cancel: &CancelFlag,
        progress: &mut dyn FnMut(u8),
    ) -> Result<IndexOutcome> {
        let start = Instant::now();
        let base = if self.update { self.base_record(cache)? } else { None };
        let base = base.unwrap_or_else(|| IndexRecord::new(self.extractor.name()));
        info!("开始建立索引: {}，已有 {} 张", self.folder.display(), base.len());

        let Some(record) = extend(base, &self.folder, self.extractor.as_ref(), cancel, progress)?
        else {
            return Ok(IndexOutcome::Cancelled);
        };
        // 提交之后停止请求不再生效，写入的索引一定对应完成事件
        if !cancel.commit() {
            return Ok(IndexOutcome::Cancelled);
        }

        cache.store(&self.output, record)?;
        info!("索引已保存到 {}，耗时 {:.2}s", self.output.display(), start.elapsed().as_secs_f32());
        Ok(IndexOutcome::Completed(self.output))
    }

    /// 读取要更新的索引，不存在时视为从头建立
    fn base_record(&self, cache: &IndexCache) -> Result<Option<IndexRecord>> {
        if !self.output.exists() {
            return Ok(None);
        }
        let record = cache.load(&self.output)?;
        check_extractor(&record, self.extractor.as_ref(), &self.output)
            .map_err(|e| EngineError::unavailable(&self.output, e))?;
        Ok(Some(record.as_ref().clone()))
    }
}
