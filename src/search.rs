//! 基于索引的搜索

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::spawn_blocking;

use crate::cache::IndexCache;
use crate::error::{EngineError, Result};
use crate::extractor::{FeatureExtractor, Features, similarity};
use crate::metrics::{self, SearchMode};

/// 一条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub path: String,
    /// 相似度，[0, 1]
    pub score: f32,
}

impl SearchResult {
    pub fn new(path: impl Into<String>, score: f32) -> Self {
        Self { path: path.into(), score }
    }
}

/// 按相似度从高到低稳定排序，`limit` 大于 0 时只保留前 `limit` 个
pub fn rank(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    if limit > 0 {
        results.truncate(limit);
    }
    results
}

/// 合并多个结果列表，同一路径只保留最高的相似度
///
/// 路径按首次出现的顺序参与排序，因此相同分数时先出现的排在前面
pub fn merge_results(lists: impl IntoIterator<Item = Vec<SearchResult>>, limit: usize) -> Vec<SearchResult> {
    let mut merged: Vec<SearchResult> = vec![];
    let mut seen: HashMap<String, usize> = HashMap::new();
    for result in lists.into_iter().flatten() {
        match seen.get(&result.path) {
            Some(&i) => {
                if result.score > merged[i].score {
                    merged[i].score = result.score;
                }
            }
            None => {
                seen.insert(result.path.clone(), merged.len());
                merged.push(result);
            }
        }
    }
    rank(merged, limit)
}

/// 在单个索引中搜索
///
/// 索引中已不存在的文件被忽略，比较失败的记录视为相似度 0。
/// 索引无法读取或者由其他提取器生成时返回 [`EngineError::IndexUnavailable`]。
pub fn search_index(
    cache: &IndexCache,
    extractor: &dyn FeatureExtractor,
    query: &Features,
    key: impl AsRef<Path>,
    threshold: f32,
    limit: usize,
) -> Result<Vec<SearchResult>> {
    let key = key.as_ref();
    let start = Instant::now();
    let record = cache.load(key)?;
    if record.extractor != extractor.name() {
        return Err(EngineError::unavailable(
            key,
            EngineError::IndexCorrupt {
                path: key.to_path_buf(),
                reason: format!("索引由 {} 生成，而不是 {}", record.extractor, extractor.name()),
            },
        ));
    }

    let mut results = vec![];
    for (path, features) in &record.entries {
        if !Path::new(path).exists() {
            debug!("跳过已删除的图片: {path}");
            continue;
        }
        let Some(score) = similarity(extractor, query, features) else {
            warn!("比较失败，视为不相似: {path}");
            continue;
        };
        if score >= threshold {
            results.push(SearchResult::new(path.as_str(), score));
        }
    }

    let results = rank(results, limit);
    let elapsed = start.elapsed().as_secs_f32();
    debug!("搜索 {} 完成，{} 条结果，耗时 {elapsed:.3}s", key.display(), results.len());
    metrics::inc_search_count(SearchMode::Index);
    metrics::inc_search_duration(SearchMode::Index, elapsed);
    Ok(results)
}

/// 多索引搜索的结果
#[derive(Debug, Default)]
pub struct MultiSearch {
    pub results: Vec<SearchResult>,
    /// 无法使用的索引及原因，这些索引不贡献任何结果
    pub errors: Vec<(PathBuf, EngineError)>,
}

/// 并发搜索多个索引并合并结果
///
/// 每个索引都不截断，合并之后再截断到 `limit`。
/// 单个索引失败不影响其他索引。
pub async fn search_many(
    cache: Arc<IndexCache>,
    extractor: Arc<dyn FeatureExtractor>,
    query: Arc<Features>,
    keys: &[PathBuf],
    threshold: f32,
    limit: usize,
) -> MultiSearch {
    let start = Instant::now();
    let tasks = keys.iter().cloned().map(|key| {
        let cache = cache.clone();
        let extractor = extractor.clone();
        let query = query.clone();
        async move {
            let task_key = key.clone();
            let result = spawn_blocking(move || {
                search_index(&cache, extractor.as_ref(), &query, &task_key, threshold, 0)
            })
            .await;
            (key, result)
        }
    });

    let mut lists = Vec::with_capacity(keys.len());
    let mut errors = vec![];
    for (key, result) in join_all(tasks).await {
        match result {
            Ok(Ok(results)) => lists.push(results),
            Ok(Err(e)) => {
                warn!("索引不可用: {e}");
                errors.push((key, e));
            }
            Err(e) => {
                warn!("搜索任务异常退出 {}: {e}", key.display());
                errors.push((key, EngineError::Io(std::io::Error::other(e))));
            }
        }
    }

    let results = merge_results(lists, limit);
    let elapsed = start.elapsed().as_secs_f32();
    info!("搜索 {} 个索引，{} 条结果，耗时 {elapsed:.3}s", keys.len(), results.len());
    metrics::inc_search_count(SearchMode::MultiIndex);
    metrics::inc_search_duration(SearchMode::MultiIndex, elapsed);
    MultiSearch { results, errors }
}
