use std::path::Path;

use anyhow::Result;
use image::GrayImage;
use image::imageops::{self, FilterType};

use super::{FeatureExtractor, Features, MISMATCH_SIMILARITY};
use crate::hamming::hamming_64;
use crate::utils;

/// 差异哈希
///
/// 将图片缩放到 9x8 的灰度图，逐行比较相邻像素的亮度，得到 64 位哈希。
/// 相似度为 `1 - 汉明距离 / 64`，是对称的。
pub struct DHashExtractor;

impl DHashExtractor {
    pub const NAME: &'static str = "dHash (structure)";

    pub fn new() -> Self {
        Self
    }

    pub fn d_hash(image: &GrayImage) -> u64 {
        let image = imageops::resize(image, 9, 8, FilterType::Triangle);
        let data = image.as_raw();
        assert!(data.len() == 72);
        let mut hash = 0u64;
        for chunk in data.chunks_exact(9) {
            for j in 0..8 {
                hash <<= 1;
                hash |= if chunk[j] < chunk[j + 1] { 1 } else { 0 };
            }
        }
        hash
    }
}

impl Default for DHashExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for DHashExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn try_extract(&self, path: &Path) -> Result<Option<Features>> {
        let image = utils::imread(path)?.to_luma8();
        Ok(Some(Features::Hash(Self::d_hash(&image))))
    }

    fn compare_features(&self, a: &Features, b: &Features) -> f32 {
        match (a, b) {
            (Features::Hash(a), Features::Hash(b)) => 1. - hamming_64(*a, *b) as f32 / 64.,
            _ => MISMATCH_SIMILARITY,
        }
    }
}
