use std::path::Path;

use anyhow::Result;
use image::RgbImage;
use image::imageops::{self, FilterType};

use super::{FeatureExtractor, Features, MISMATCH_SIMILARITY};
use crate::utils;

/// H、S、V 三个通道的分箱数量
const BINS: [usize; 3] = [8, 8, 8];
/// 统计前缩放到的尺寸
const SIDE: u32 = 256;

/// HSV 颜色直方图
///
/// 相似度为相关系数、交集、卡方距离三种度量的平均值。
/// 交集和卡方距离以第一个参数为基准归一化，所以比较是不对称的。
pub struct ColorHistogramExtractor;

impl ColorHistogramExtractor {
    pub const NAME: &'static str = "Color histogram (colors)";

    pub fn new() -> Self {
        Self
    }

    /// 计算归一化到 [0, 1] 的 HSV 直方图
    pub fn histogram(image: &RgbImage) -> Vec<f32> {
        let mut hist = vec![0f32; BINS[0] * BINS[1] * BINS[2]];
        for pixel in image.pixels() {
            let [h, s, v] = rgb_to_hsv(pixel.0);
            let h = (h as usize * BINS[0] / 180).min(BINS[0] - 1);
            let s = s as usize * BINS[1] / 256;
            let v = v as usize * BINS[2] / 256;
            hist[(h * BINS[1] + s) * BINS[2] + v] += 1.;
        }
        normalize_min_max(&mut hist);
        hist
    }
}

impl Default for ColorHistogramExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for ColorHistogramExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn try_extract(&self, path: &Path) -> Result<Option<Features>> {
        let image = utils::imread(path)?.to_rgb8();
        let image = imageops::resize(&image, SIDE, SIDE, FilterType::Triangle);
        Ok(Some(Features::Vector(Self::histogram(&image))))
    }

    fn compare_features(&self, a: &Features, b: &Features) -> f32 {
        match (a, b) {
            (Features::Vector(a), Features::Vector(b)) if a.len() == b.len() => {
                let correlation = (correlation(a, b) + 1.) / 2.;
                let intersection = intersection(a, b);
                let chi_square = (-chi_square(a, b) / 10.).exp();
                ((correlation + intersection + chi_square) / 3.) as f32
            }
            _ => MISMATCH_SIMILARITY,
        }
    }

    fn is_symmetric(&self) -> bool {
        false
    }
}

/// OpenCV 约定的 8 位 HSV：H ∈ [0, 180)，S、V ∈ [0, 255]
fn rgb_to_hsv([r, g, b]: [u8; 3]) -> [u8; 3] {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = v - min;
    let s = if v > 0. { 255. * delta / v } else { 0. };
    let mut h = if delta == 0. {
        0.
    } else if v == r {
        60. * (g - b) / delta
    } else if v == g {
        120. + 60. * (b - r) / delta
    } else {
        240. + 60. * (r - g) / delta
    };
    if h < 0. {
        h += 360.;
    }
    [(h / 2.).round().min(179.) as u8, s.round() as u8, v as u8]
}

fn normalize_min_max(hist: &mut [f32]) {
    let max = hist.iter().copied().fold(f32::MIN, f32::max);
    let min = hist.iter().copied().fold(f32::MAX, f32::min);
    let range = max - min;
    for x in hist.iter_mut() {
        *x = if range > 0. { (*x - min) / range } else { 1. };
    }
}

fn correlation(a: &[f32], b: &[f32]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().map(|&x| x as f64).sum::<f64>() / n;
    let mean_b = b.iter().map(|&x| x as f64).sum::<f64>() / n;
    let (mut num, mut da, mut db) = (0., 0., 0.);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (x as f64 - mean_a, y as f64 - mean_b);
        num += x * y;
        da += x * x;
        db += y * y;
    }
    let denom = da * db;
    if denom > f64::EPSILON { num / denom.sqrt() } else { 1. }
}

fn intersection(a: &[f32], b: &[f32]) -> f64 {
    let sum = a.iter().map(|&x| x as f64).sum::<f64>();
    if sum <= f64::EPSILON {
        return 0.;
    }
    let inter = a.iter().zip(b).map(|(&x, &y)| x.min(y) as f64).sum::<f64>();
    inter / sum
}

fn chi_square(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .filter(|(x, _)| x.abs() > f32::EPSILON)
        .map(|(&x, &y)| {
            let d = (x - y) as f64;
            d * d / x as f64
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::*;

    fn solid(color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(32, 32, Rgb(color))
    }

    fn gradient() -> RgbImage {
        RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 128]))
    }

    #[test]
    fn test_rgb_to_hsv() {
        assert_eq!(rgb_to_hsv([255, 0, 0]), [0, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 255, 0]), [60, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 255]), [120, 255, 255]);
        assert_eq!(rgb_to_hsv([0, 0, 0]), [0, 0, 0]);
        assert_eq!(rgb_to_hsv([128, 128, 128]), [0, 0, 128]);
    }

    #[test]
    fn test_histogram_normalized() {
        let hist = ColorHistogramExtractor::histogram(&gradient());
        assert_eq!(hist.len(), 512);
        assert!(hist.iter().all(|&x| (0. ..=1.).contains(&x)));
        assert!(hist.contains(&1.));
    }

    #[test]
    fn test_compare_reflexive() {
        let extractor = ColorHistogramExtractor::new();
        for image in [gradient(), solid([200, 10, 10])] {
            let f = Features::Vector(ColorHistogramExtractor::histogram(&image));
            assert!((extractor.compare(&f, &f) - 1.).abs() < 1e-5);
        }
    }

    #[test]
    fn test_compare_different_colors() {
        let extractor = ColorHistogramExtractor::new();
        let red = Features::Vector(ColorHistogramExtractor::histogram(&solid([220, 0, 0])));
        let blue = Features::Vector(ColorHistogramExtractor::histogram(&solid([0, 0, 220])));
        let red2 = Features::Vector(ColorHistogramExtractor::histogram(&solid([215, 3, 3])));
        let similar = extractor.compare(&red, &red2);
        let different = extractor.compare(&red, &blue);
        assert!(similar > different, "{similar} <= {different}");
        assert!((0. ..=1.).contains(&different));
    }

    #[test]
    fn test_compare_shape_mismatch() {
        let extractor = ColorHistogramExtractor::new();
        let a = Features::Vector(vec![1., 0.]);
        let b = Features::Vector(vec![1., 0., 0.]);
        assert_eq!(extractor.compare(&a, &b), MISMATCH_SIMILARITY);
        assert_eq!(extractor.compare(&a, &Features::Hash(1)), MISMATCH_SIMILARITY);
    }
}
