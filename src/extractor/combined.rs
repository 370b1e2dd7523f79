use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use super::{
    ColorHistogramExtractor, DHashExtractor, FeatureExtractor, Features, MISMATCH_SIMILARITY,
};

/// 若干个提取器的加权组合
///
/// 任意一个子提取器没有得到特征时，整张图片视为没有特征。
pub struct CombinedExtractor {
    name: String,
    parts: Vec<(Arc<dyn FeatureExtractor>, f32)>,
}

impl CombinedExtractor {
    pub const NAME: &'static str = "Color + structure";

    pub fn new(name: impl Into<String>, parts: Vec<(Arc<dyn FeatureExtractor>, f32)>) -> Self {
        Self { name: name.into(), parts }
    }

    /// 颜色直方图 40% + 差异哈希 60%
    pub fn color_and_structure() -> Self {
        Self::new(
            Self::NAME,
            vec![
                (Arc::new(ColorHistogramExtractor::new()) as Arc<dyn FeatureExtractor>, 0.4),
                (Arc::new(DHashExtractor::new()) as Arc<dyn FeatureExtractor>, 0.6),
            ],
        )
    }
}

impl FeatureExtractor for CombinedExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_extract(&self, path: &Path) -> Result<Option<Features>> {
        let mut features = Vec::with_capacity(self.parts.len());
        for (extractor, _) in &self.parts {
            match extractor.try_extract(path)? {
                Some(f) if !f.is_empty() => features.push(f),
                _ => return Ok(None),
            }
        }
        Ok(Some(Features::Composite(features)))
    }

    fn compare_features(&self, a: &Features, b: &Features) -> f32 {
        match (a, b) {
            (Features::Composite(a), Features::Composite(b))
                if a.len() == self.parts.len() && b.len() == self.parts.len() =>
            {
                let total = self.parts.iter().map(|(_, w)| w).sum::<f32>();
                if total <= 0. {
                    return MISMATCH_SIMILARITY;
                }
                let score = self
                    .parts
                    .iter()
                    .zip(a.iter().zip(b))
                    .map(|((extractor, w), (a, b))| w * extractor.compare(a, b))
                    .sum::<f32>();
                score / total
            }
            _ => MISMATCH_SIMILARITY,
        }
    }

    fn is_symmetric(&self) -> bool {
        self.parts.iter().all(|(extractor, _)| extractor.is_symmetric())
    }
}
