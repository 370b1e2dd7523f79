//! 不使用索引，逐一比较目录中的图片

use std::path::Path;
use std::time::Instant;

use log::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::extractor::{FeatureExtractor, Features, extract_guarded, similarity};
use crate::metrics::{self, SearchMode};
use crate::search::{SearchResult, rank};
use crate::utils;
use crate::worker::CancelFlag;

/// 一次扫描的结果，被取消时没有结果列表
#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    Completed(Vec<SearchResult>),
    Cancelled,
}

/// 用已经提取好的查询特征扫描目录
///
/// 每处理完一张图片报告一次进度；空目录直接完成，进度为 100。
pub fn scan(
    query: &Features,
    folder: impl AsRef<Path>,
    extractor: &dyn FeatureExtractor,
    threshold: f32,
    limit: usize,
    cancel: &CancelFlag,
    progress: &mut dyn FnMut(u8),
) -> ScanOutcome {
    let folder = folder.as_ref();
    let start = Instant::now();
    let images = utils::find_images(folder);
    if images.is_empty() {
        info!("目录中没有图片: {}", folder.display());
        progress(100);
        return ScanOutcome::Completed(vec![]);
    }

    let total = images.len();
    let mut results = vec![];
    for (i, path) in images.iter().enumerate() {
        if cancel.is_cancelled() {
            info!("扫描已取消，已处理 {i}/{total}");
            return ScanOutcome::Cancelled;
        }
        match extract_guarded(extractor, path) {
            Some(features) => match similarity(extractor, query, &features) {
                Some(score) if score >= threshold => {
                    results.push(SearchResult::new(path.to_string_lossy(), score))
                }
                Some(_) => {}
                None => warn!("比较失败，视为不相似: {}", path.display()),
            },
            None => debug!("跳过没有特征的图片: {}", path.display()),
        }
        if cancel.is_cancelled() {
            info!("扫描已取消，已处理 {}/{total}", i + 1);
            return ScanOutcome::Cancelled;
        }
        progress(utils::percent(i + 1, total));
    }

    let results = rank(results, limit);
    let elapsed = start.elapsed().as_secs_f32();
    info!("扫描 {total} 张图片，{} 条结果，耗时 {elapsed:.2}s", results.len());
    metrics::inc_search_count(SearchMode::Scan);
    metrics::inc_search_duration(SearchMode::Scan, elapsed);
    ScanOutcome::Completed(results)
}

/// 先提取查询图片的特征再扫描，查询图片无法提取特征时直接失败
pub fn scan_image(
    query: impl AsRef<Path>,
    folder: impl AsRef<Path>,
    extractor: &dyn FeatureExtractor,
    threshold: f32,
    limit: usize,
    cancel: &CancelFlag,
    progress: &mut dyn FnMut(u8),
) -> Result<ScanOutcome> {
    let query = query.as_ref();
    let features = extract_guarded(extractor, query)
        .ok_or_else(|| EngineError::FeatureExtractionFailed(query.to_path_buf()))?;
    Ok(scan(&features, folder, extractor, threshold, limit, cancel, progress))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::indexer::tests::{ScoreExtractor, write_images};

    fn names(outcome: ScanOutcome) -> Vec<(String, f32)> {
        let ScanOutcome::Completed(results) = outcome else { panic!("cancelled") };
        results
            .iter()
            .map(|r| {
                let name = Path::new(&r.path).file_name().unwrap().to_string_lossy().to_string();
                (name, r.score)
            })
            .collect()
    }

    #[test]
    fn test_scan_scenario() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let folder = dir.path().join("images");
        fs::create_dir(&folder)?;
        write_images(&folder, &[("a.jpg", "0.9"), ("b.jpg", "0.4"), ("c.jpg", "0.95")])?;
        let query = dir.path().join("query.jpg");
        fs::write(&query, "1")?;

        let mut progress = vec![];
        let outcome = scan_image(
            &query,
            &folder,
            &ScoreExtractor,
            0.5,
            2,
            &CancelFlag::new(),
            &mut |p| progress.push(p),
        )?;
        assert_eq!(names(outcome), vec![("c.jpg".to_string(), 0.95), ("a.jpg".to_string(), 0.9)]);
        assert_eq!(progress, vec![33, 67, 100]);
        Ok(())
    }

    #[test]
    fn test_scan_query_failed() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        write_images(dir.path(), &[("a.jpg", "0.9"), ("query.jpg", "broken")])?;
        let mut progress = vec![];
        let result = scan_image(
            dir.path().join("query.jpg"),
            dir.path(),
            &ScoreExtractor,
            0.0,
            0,
            &CancelFlag::new(),
            &mut |p| progress.push(p),
        );
        assert!(matches!(result, Err(EngineError::FeatureExtractionFailed(_))));
        assert!(progress.is_empty());
        Ok(())
    }

    #[test]
    fn test_scan_empty_folder() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut progress = vec![];
        let outcome = scan(
            &Features::Vector(vec![1.0]),
            dir.path(),
            &ScoreExtractor,
            0.0,
            0,
            &CancelFlag::new(),
            &mut |p| progress.push(p),
        );
        assert_eq!(outcome, ScanOutcome::Completed(vec![]));
        assert_eq!(progress, vec![100]);
        Ok(())
    }

    #[test]
    fn test_scan_cancelled() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        for i in 0..10 {
            fs::write(dir.path().join(format!("{i}.jpg")), "0.8")?;
        }
        let cancel = CancelFlag::new();
        let mut progress = vec![];
        let outcome = scan(
            &Features::Vector(vec![1.0]),
            dir.path(),
            &ScoreExtractor,
            0.0,
            0,
            &cancel,
            &mut |p| {
                progress.push(p);
                if p >= 50 {
                    cancel.cancel();
                }
            },
        );
        assert_eq!(outcome, ScanOutcome::Cancelled);
        assert_eq!(progress, vec![10, 20, 30, 40, 50]);
        Ok(())
    }
}
