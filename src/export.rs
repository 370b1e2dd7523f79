//! 导出搜索结果：复制图片并写入说明文件

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use log::info;

use crate::search::SearchResult;

/// 说明文件名
pub const MANIFEST: &str = "info.txt";

/// 在 `base` 下创建 `results_<查询名>_<时间>` 目录
pub fn create_results_folder(base: impl AsRef<Path>, query_name: &str) -> Result<PathBuf> {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let dir = base.as_ref().join(format!("results_{query_name}_{timestamp}"));
    fs::create_dir_all(&dir).with_context(|| format!("无法创建目录 {}", dir.display()))?;
    Ok(dir)
}

/// 将查询图片与结果图片复制到 `dir`，并写入说明文件
///
/// 结果图片按排名命名为 `result_001_sim_0.95.jpg` 的形式。
pub fn save_results(
    query: impl AsRef<Path>,
    results: &[SearchResult],
    dir: impl AsRef<Path>,
    extractor: &str,
    threshold: f32,
) -> Result<()> {
    let query = query.as_ref();
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let query_name = query.file_name().context("查询图片没有文件名")?;
    let mut query_dest = std::ffi::OsString::from("query_");
    query_dest.push(query_name);
    fs::copy(query, dir.join(query_dest))
        .with_context(|| format!("无法复制 {}", query.display()))?;

    for (i, result) in results.iter().enumerate() {
        let src = Path::new(&result.path);
        let ext = src.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
        let dest = dir.join(format!("result_{:03}_sim_{:.2}{ext}", i + 1, result.score));
        fs::copy(src, &dest).with_context(|| format!("无法复制 {}", src.display()))?;
    }

    fs::write(dir.join(MANIFEST), manifest(query, results, extractor, threshold))?;
    info!("已导出 {} 条结果到 {}", results.len(), dir.display());
    Ok(())
}

fn manifest(query: &Path, results: &[SearchResult], extractor: &str, threshold: f32) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "查询: {}", query.display());
    let _ = writeln!(text, "提取器: {extractor}");
    let _ = writeln!(text, "相似度阈值: {threshold}");
    let _ = writeln!(text, "结果数量: {}", results.len());
    let _ = writeln!(text, "搜索时间: {}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    text.push('\n');
    for (i, result) in results.iter().enumerate() {
        let _ = writeln!(text, "{}. {} - 相似度: {:.4}", i + 1, result.path, result.score);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_results() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let query = dir.path().join("cat.png");
        let a = dir.path().join("a.jpg");
        let b = dir.path().join("b.webp");
        fs::write(&query, b"query")?;
        fs::write(&a, b"a")?;
        fs::write(&b, b"b")?;

        let out = create_results_folder(dir.path(), "cat")?;
        assert!(out.file_name().unwrap().to_string_lossy().starts_with("results_cat_"));

        let results = vec![
            SearchResult::new(a.to_string_lossy(), 0.953),
            SearchResult::new(b.to_string_lossy(), 0.7),
        ];
        save_results(&query, &results, &out, "dHash (structure)", 0.7)?;

        assert_eq!(fs::read(out.join("query_cat.png"))?, b"query");
        assert_eq!(fs::read(out.join("result_001_sim_0.95.jpg"))?, b"a");
        assert_eq!(fs::read(out.join("result_002_sim_0.70.webp"))?, b"b");

        let manifest = fs::read_to_string(out.join(MANIFEST))?;
        assert!(manifest.contains("提取器: dHash (structure)"));
        assert!(manifest.contains("相似度阈值: 0.7"));
        assert!(manifest.contains("结果数量: 2"));
        assert!(manifest.contains(&format!("1. {} - 相似度: 0.9530", a.display())));
        assert!(manifest.contains(&format!("2. {} - 相似度: 0.7000", b.display())));
        Ok(())
    }

    #[test]
    fn test_save_results_missing_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let query = dir.path().join("q.jpg");
        fs::write(&query, b"q")?;
        let results = vec![SearchResult::new("/no/such/file.jpg", 0.9)];
        assert!(save_results(&query, &results, dir.path().join("out"), "x", 0.5).is_err());
        Ok(())
    }
}
