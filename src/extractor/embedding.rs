use std::path::Path;

use anyhow::Result;
use image::GrayImage;
use image::imageops::{self, FilterType};

use super::{FeatureExtractor, Features, MISMATCH_SIMILARITY, cosine_similarity};
use crate::utils;

/// 每个子向量对应的边长（像素）
const CELL: u32 = 16;

/// 基于灰度缩略图的嵌入向量
///
/// 图片被划分为 `grid x grid` 个区域，每个区域缩放为 16x16 后去均值，
/// 末尾附加该区域的平均亮度，作为一个子向量。
/// 两张图片的相似度取所有子向量组合中相似度的最大值，
/// 与多人脸图片的比较方式相同。取最大值的比较是对称的。
pub struct EmbeddingExtractor {
    name: &'static str,
    grid: u32,
}

impl EmbeddingExtractor {
    pub const THUMBNAIL_NAME: &'static str = "Thumbnail embedding (composition)";
    pub const REGIONS_NAME: &'static str = "Region embeddings (fragments)";

    /// 整张图片一个向量
    pub fn thumbnail() -> Self {
        Self { name: Self::THUMBNAIL_NAME, grid: 1 }
    }

    /// 2x2 个区域，每个区域一个向量
    pub fn regions() -> Self {
        Self { name: Self::REGIONS_NAME, grid: 2 }
    }

    pub fn embed(&self, image: &GrayImage) -> Vec<Vec<f32>> {
        let side = CELL * self.grid;
        let image = imageops::resize(image, side, side, FilterType::Triangle);
        let mut vectors = Vec::with_capacity((self.grid * self.grid) as usize);
        for gy in 0..self.grid {
            for gx in 0..self.grid {
                let cell = imageops::crop_imm(&image, gx * CELL, gy * CELL, CELL, CELL).to_image();
                let mut v = cell.as_raw().iter().map(|&p| p as f32 / 255.).collect::<Vec<_>>();
                let mean = v.iter().sum::<f32>() / v.len() as f32;
                v.iter_mut().for_each(|x| *x -= mean);
                v.push(mean);
                vectors.push(v);
            }
        }
        vectors
    }
}

impl FeatureExtractor for EmbeddingExtractor {
    fn name(&self) -> &str {
        self.name
    }

    fn try_extract(&self, path: &Path) -> Result<Option<Features>> {
        let image = utils::imread(path)?.to_luma8();
        Ok(Some(Features::Embeddings(self.embed(&image))))
    }

    fn compare_features(&self, a: &Features, b: &Features) -> f32 {
        let (Features::Embeddings(a), Features::Embeddings(b)) = (a, b) else {
            return MISMATCH_SIMILARITY;
        };
        let mut best: Option<f32> = None;
        for va in a.iter().filter(|v| !v.is_empty()) {
            for vb in b.iter().filter(|v| !v.is_empty()) {
                if let Some(s) = cell_similarity(va, vb) {
                    best = Some(best.map_or(s, |best| best.max(s)));
                }
            }
        }
        best.unwrap_or(MISMATCH_SIMILARITY)
    }
}

/// 纯色区域去均值后是零向量，没有方向，只能按平均亮度比较
fn cell_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    let ((&ma, a), (&mb, b)) = (a.split_last()?, b.split_last()?);
    match (is_flat(a), is_flat(b)) {
        (false, false) => cosine_similarity(a, b),
        (true, true) if a.len() == b.len() => Some(1. - (ma - mb).abs().min(1.)),
        (true, true) => None,
        _ => (a.len() == b.len()).then_some(0.),
    }
}

fn is_flat(v: &[f32]) -> bool {
    v.iter().map(|x| x * x).sum::<f32>() <= f32::EPSILON
}
