use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::Result;
use image::{DynamicImage, ImageReader};
use indicatif::ProgressStyle;
use log::debug;
use regex::Regex;
use walkdir::WalkDir;

/// 支持的图片后缀名
pub const IMAGE_SUFFIX: &str = "jpg,jpeg,png,bmp,tiff,webp";

static RE_IMAGE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| suffix_regex(IMAGE_SUFFIX));

/// 根据逗号分隔的后缀名列表构建大小写不敏感的正则表达式
pub fn suffix_regex(suffix: &str) -> Regex {
    let re = format!("(?i)^({})$", suffix.replace(',', "|"));
    Regex::new(&re).expect("failed to build regex")
}

/// 列出目录下（不递归）所有图片文件，按文件名排序
pub fn find_images(folder: impl AsRef<Path>) -> Vec<PathBuf> {
    let folder = absolute(folder.as_ref());
    let entries = WalkDir::new(&folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| {
            entry.ok().and_then(|entry| {
                let path = entry.path();
                if path.is_file() {
                    if let Some(ext) = path.extension() {
                        if RE_IMAGE_SUFFIX.is_match(&ext.to_string_lossy()) {
                            return Some(path.to_path_buf());
                        }
                    }
                }
                None
            })
        })
        .collect::<Vec<_>>();
    debug!("扫描完成，{} 中共 {} 张图片", folder.display(), entries.len());
    entries
}

/// 返回绝对路径，失败时原样返回
pub fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// 索引中使用的路径键
pub fn path_key(path: &Path) -> String {
    absolute(path).to_string_lossy().to_string()
}

/// 读取并解码图片，格式由文件内容推断
pub fn imread(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let image = ImageReader::open(path.as_ref())?.with_guessed_format()?.decode()?;
    Ok(image)
}

/// 进度百分比，`round(100 * done / total)`
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100 + total / 2) / total).min(100) as u8
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}% ({eta}) {msg}")
        .expect("failed to build progress style")
        .progress_chars("#>-")
}
