use std::cell::RefCell;
use std::path::Path;

use anyhow::{Result, anyhow};
use opencv::core::{KeyPoint, Mat, Ptr, Size, Vector, no_array};
use opencv::features2d::{ORB, ORB_ScoreType};
use opencv::prelude::*;
use opencv::{imgcodecs, imgproc};

use super::keypoint::match_descriptors;
use super::{FeatureExtractor, Features, MISMATCH_SIMILARITY};
use crate::hamming::{DESCRIPTOR_SIZE, Descriptor};

/// ORB 特征点最大保留数量
const NFEATURES: i32 = 1000;
/// 图片最大尺寸，宽高超过时等比缩放
const MAX_SIZE: (i32, i32) = (1920, 1080);

thread_local! {
    static ORB_DETECTOR: RefCell<Option<Ptr<ORB>>> = const { RefCell::new(None) };
}

/// ORB 关键点描述符
///
/// 描述符匹配使用 [`match_descriptors`]，比较结果是不对称的。
pub struct OrbExtractor;

impl OrbExtractor {
    pub const NAME: &'static str = "ORB (objects and shapes)";

    pub fn new() -> Self {
        Self
    }

    fn detect_and_compute(image: &Mat) -> opencv::Result<Vec<Descriptor>> {
        ORB_DETECTOR.with(|orb| {
            let mut orb = orb.borrow_mut();
            if orb.is_none() {
                *orb = Some(ORB::create(
                    NFEATURES,
                    1.2,
                    8,
                    31,
                    0,
                    2,
                    ORB_ScoreType::HARRIS_SCORE,
                    31,
                    20,
                )?);
            }
            let Some(orb) = orb.as_mut() else { unreachable!() };

            let mut keypoints = Vector::<KeyPoint>::new();
            let mut descriptors = Mat::default();
            orb.detect_and_compute(image, &no_array(), &mut keypoints, &mut descriptors, false)?;
            if descriptors.empty() {
                return Ok(vec![]);
            }
            let data = descriptors.data_bytes()?;
            Ok(data
                .chunks_exact(DESCRIPTOR_SIZE)
                .map(|chunk| {
                    let mut d = [0u8; DESCRIPTOR_SIZE];
                    d.copy_from_slice(chunk);
                    d
                })
                .collect())
        })
    }
}

impl Default for OrbExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor for OrbExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn try_extract(&self, path: &Path) -> Result<Option<Features>> {
        let path = path.to_str().ok_or_else(|| anyhow!("路径不是合法的 UTF-8"))?;
        let image = imread(path)?;
        if image.empty() {
            return Ok(None);
        }
        let descriptors = Self::detect_and_compute(&image)?;
        if descriptors.is_empty() {
            return Ok(None);
        }
        Ok(Some(Features::Descriptors(descriptors)))
    }

    fn compare_features(&self, a: &Features, b: &Features) -> f32 {
        match (a, b) {
            (Features::Descriptors(a), Features::Descriptors(b)) => match_descriptors(a, b),
            _ => MISMATCH_SIMILARITY,
        }
    }

    fn is_symmetric(&self) -> bool {
        false
    }
}

/// 以灰度模式读取图片，宽高都超过限制时等比缩放
fn imread(filename: &str) -> opencv::Result<Mat> {
    let img = imgcodecs::imread(filename, imgcodecs::IMREAD_GRAYSCALE)?;
    if img.empty() || (img.cols() <= MAX_SIZE.0 && img.rows() <= MAX_SIZE.1) {
        return Ok(img);
    }
    let (ow, oh) = (img.cols() as f64, img.rows() as f64);
    let scale = (MAX_SIZE.1 as f64 / oh).min(MAX_SIZE.0 as f64 / ow);
    let mut output = Mat::default();
    imgproc::resize(
        &img,
        &mut output,
        Size::default(),
        scale,
        scale,
        imgproc::InterpolationFlags::INTER_AREA as i32,
    )?;
    Ok(output)
}
