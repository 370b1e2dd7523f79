//! 特征提取器
//!
//! 引擎只依赖 [`FeatureExtractor`] 的两个操作：`extract` 与 `compare`。
//! [`Features`] 对引擎来说是不透明的，只有产生它的提取器才会检查其内部结构。

mod combined;
mod dhash;
mod embedding;
mod histogram;
pub mod keypoint;
#[cfg(feature = "opencv")]
mod orb;

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::sync::Arc;

use clap::ValueEnum;
use log::warn;
use serde::{Deserialize, Serialize};

pub use self::combined::CombinedExtractor;
pub use self::dhash::DHashExtractor;
pub use self::embedding::EmbeddingExtractor;
pub use self::histogram::ColorHistogramExtractor;
#[cfg(feature = "opencv")]
pub use self::orb::OrbExtractor;
use crate::error::EngineError;
use crate::hamming::Descriptor;

/// 两个特征形状不一致时返回的相似度
pub const MISMATCH_SIMILARITY: f32 = 0.1;

/// 提取器产生的特征
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Features {
    /// 定长浮点向量，例如颜色直方图
    Vector(Vec<f32>),
    /// 64 位感知哈希
    Hash(u64),
    /// 关键点的二进制描述符集合
    Descriptors(Vec<Descriptor>),
    /// 若干个子向量，例如一张图片中的多个区域
    Embeddings(Vec<Vec<f32>>),
    /// 组合提取器中每个子提取器的特征
    Composite(Vec<Features>),
}

impl Features {
    pub fn is_empty(&self) -> bool {
        match self {
            Features::Vector(v) => v.is_empty(),
            Features::Hash(_) => false,
            Features::Descriptors(d) => d.is_empty(),
            Features::Embeddings(e) => e.iter().all(|v| v.is_empty()),
            Features::Composite(parts) => parts.is_empty(),
        }
    }
}

pub trait FeatureExtractor: Send + Sync {
    /// 提取器的唯一名称，同名的提取器产生的特征必须可以互相比较
    fn name(&self) -> &str;

    /// 从图片中提取特征
    ///
    /// 返回 `Ok(None)` 表示图片可以读取，但没有可用的特征
    fn try_extract(&self, path: &Path) -> anyhow::Result<Option<Features>>;

    /// 比较两组由本提取器产生的特征，返回 [0, 1] 之间的相似度
    ///
    /// 调用时两组特征都不为空
    fn compare_features(&self, a: &Features, b: &Features) -> f32;

    /// `compare(a, b)` 是否总是等于 `compare(b, a)`
    fn is_symmetric(&self) -> bool {
        true
    }

    /// 提取特征，读取失败或没有特征时返回 `None`
    fn extract(&self, path: &Path) -> Option<Features> {
        match self.try_extract(path) {
            Ok(Some(features)) if !features.is_empty() => Some(features),
            Ok(_) => None,
            Err(e) => {
                warn!("提取特征失败 {}: {}", path.display(), e);
                None
            }
        }
    }

    /// 比较两组特征，任一为空时返回 0
    fn compare(&self, a: &Features, b: &Features) -> f32 {
        if a.is_empty() || b.is_empty() {
            return 0.0;
        }
        self.compare_features(a, b)
    }
}

/// 提取特征，提取器内部 panic 时同样视为没有特征
pub fn extract_guarded(extractor: &dyn FeatureExtractor, path: &Path) -> Option<Features> {
    match catch_unwind(AssertUnwindSafe(|| extractor.extract(path))) {
        Ok(features) => features,
        Err(_) => {
            warn!("提取特征时发生 panic: {}", path.display());
            None
        }
    }
}

/// 计算相似度，结果不是有限数时视为比较失败
pub fn similarity(extractor: &dyn FeatureExtractor, a: &Features, b: &Features) -> Option<f32> {
    let score = extractor.compare(a, b);
    score.is_finite().then(|| score.clamp(0.0, 1.0))
}

/// 内置的提取器
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    /// HSV 颜色直方图，速度快，适合寻找色调相近的图片
    Histogram,
    /// 差异哈希，速度快，适合寻找构图几乎相同的图片
    Dhash,
    /// 缩略图嵌入向量，整体构图相似度
    Thumbnail,
    /// 分块嵌入向量，取所有区域组合中的最佳匹配，适合裁剪过的图片
    Regions,
    /// 颜色直方图与差异哈希的加权组合
    Combined,
    /// ORB 关键点，速度慢，对旋转和缩放不敏感
    #[cfg(feature = "opencv")]
    Orb,
}

impl ExtractorKind {
    pub fn identity(self) -> &'static str {
        match self {
            ExtractorKind::Histogram => ColorHistogramExtractor::NAME,
            ExtractorKind::Dhash => DHashExtractor::NAME,
            ExtractorKind::Thumbnail => EmbeddingExtractor::THUMBNAIL_NAME,
            ExtractorKind::Regions => EmbeddingExtractor::REGIONS_NAME,
            ExtractorKind::Combined => CombinedExtractor::NAME,
            #[cfg(feature = "opencv")]
            ExtractorKind::Orb => OrbExtractor::NAME,
        }
    }

    pub fn create(self) -> Arc<dyn FeatureExtractor> {
        match self {
            ExtractorKind::Histogram => Arc::new(ColorHistogramExtractor::new()),
            ExtractorKind::Dhash => Arc::new(DHashExtractor::new()),
            ExtractorKind::Thumbnail => Arc::new(EmbeddingExtractor::thumbnail()),
            ExtractorKind::Regions => Arc::new(EmbeddingExtractor::regions()),
            ExtractorKind::Combined => Arc::new(CombinedExtractor::color_and_structure()),
            #[cfg(feature = "opencv")]
            ExtractorKind::Orb => Arc::new(OrbExtractor::new()),
        }
    }

    /// 根据名称找到对应的提取器，用于打开已有索引
    pub fn from_identity(name: &str) -> Result<Self, EngineError> {
        Self::value_variants()
            .iter()
            .copied()
            .find(|kind| kind.identity() == name)
            .ok_or_else(|| EngineError::UnknownExtractor(name.to_owned()))
    }
}

/// 余弦相似度映射到 [0, 1]
///
/// 任一向量是零向量时没有方向，相似度为 0
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    let (mut dot, mut na, mut nb) = (0f64, 0f64, 0f64);
    for (&x, &y) in a.iter().zip(b) {
        dot += x as f64 * y as f64;
        na += x as f64 * x as f64;
        nb += y as f64 * y as f64;
    }
    if na <= f64::EPSILON || nb <= f64::EPSILON {
        return Some(0.0);
    }
    let cosine = dot / (na * nb).sqrt();
    Some(((cosine.clamp(-1.0, 1.0) + 1.0) / 2.0) as f32)
}
