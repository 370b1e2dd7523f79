//! 二进制关键点描述符的匹配

use crate::hamming::{Descriptor, knn_hamming};

/// Lowe 比率测试的阈值
pub const RATIO: f32 = 0.7;
/// 好匹配占比的放大系数，使得部分重叠的图片也能得到较高分数
const SCALE: f32 = 3.;

/// 比较两组描述符
///
/// 对 `des1` 中的每个描述符，在 `des2` 中找到最近的两个邻居，
/// 通过比率测试的视为好匹配，相似度为 `min(1, 好匹配数 / max(n1, n2) * 3)`。
/// 结果依赖于以哪一组作为查询，是不对称的。
pub fn match_descriptors(des1: &[Descriptor], des2: &[Descriptor]) -> f32 {
    if des1.is_empty() || des2.is_empty() {
        return 0.;
    }
    let good = des1.iter().filter(|d| is_good_match(&knn_hamming(d, des2, 2))).count();
    (good as f32 / des1.len().max(des2.len()) as f32 * SCALE).min(1.)
}

fn is_good_match(neighbors: &[(usize, u32)]) -> bool {
    match neighbors {
        [(_, m), (_, n)] => *m == 0 || (*m as f32) < RATIO * *n as f32,
        // 只有一个邻居时视为好匹配
        [_] => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;

    use super::*;

    fn random_descriptors(n: usize, seed: u64) -> Vec<Descriptor> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                let mut d = [0u8; 32];
                rng.fill_bytes(&mut d);
                d
            })
            .collect()
    }

    #[test]
    fn test_match_reflexive() {
        let des = random_descriptors(100, 1);
        assert_eq!(match_descriptors(&des, &des), 1.);
        // 重复的描述符同样满足自反性
        let dup = vec![[7u8; 32]; 5];
        assert_eq!(match_descriptors(&dup, &dup), 1.);
    }

    #[test]
    fn test_match_unrelated() {
        let a = random_descriptors(100, 1);
        let b = random_descriptors(100, 2);
        assert!(match_descriptors(&a, &b) < 0.2);
    }

    #[test]
    fn test_match_partial_overlap() {
        let a = random_descriptors(90, 3);
        let mut b = random_descriptors(90, 4);
        b[..20].copy_from_slice(&a[..20]);
        let s = match_descriptors(&a, &b);
        assert!(s >= 20. / 90. * 3. - 1e-6, "{s}");
    }

    #[test]
    fn test_match_subset() {
        let a = random_descriptors(10, 5);
        let mut b = random_descriptors(40, 6);
        b[..10].copy_from_slice(&a);
        // a 的每个描述符都能在 b 中找到
        assert_eq!(match_descriptors(&a, &b), 10. / 40. * 3.);
        assert!(match_descriptors(&b, &a) >= match_descriptors(&a, &b));
    }

    #[test]
    fn test_match_empty() {
        assert_eq!(match_descriptors(&[], &random_descriptors(3, 7)), 0.);
    }
}
