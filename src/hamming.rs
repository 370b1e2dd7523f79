use bytemuck::try_cast_slice;

/// ORB 等二进制描述符的长度（字节）
pub const DESCRIPTOR_SIZE: usize = 32;

/// 256 位二进制描述符
pub type Descriptor = [u8; DESCRIPTOR_SIZE];

/// 计算两个 64 位哈希的汉明距离
#[inline(always)]
pub fn hamming_64(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// 计算两个 N 位向量的汉明距离
#[inline(always)]
pub fn hamming<const N: usize>(va: &[u8], vb: &[u8]) -> u32 {
    match N {
        256 => hamming_256(va, vb),
        _ => hamming_naive::<N>(va, vb),
    }
}

#[inline(always)]
pub fn hamming_naive<const N: usize>(va: &[u8], vb: &[u8]) -> u32 {
    let mut sum = 0;
    for i in 0..N / 8 {
        sum += (va[i] ^ vb[i]).count_ones();
    }
    sum
}

#[inline(always)]
pub fn hamming_256(va: &[u8], vb: &[u8]) -> u32 {
    // 描述符存放在 Vec<[u8; 32]> 中时不一定按 8 字节对齐，此时退回逐字节计算
    match (try_cast_slice::<u8, u64>(va), try_cast_slice::<u8, u64>(vb)) {
        (Ok(va), Ok(vb)) => {
            (va[0] ^ vb[0]).count_ones()
                + (va[1] ^ vb[1]).count_ones()
                + (va[2] ^ vb[2]).count_ones()
                + (va[3] ^ vb[3]).count_ones()
        }
        _ => hamming_naive::<256>(va, vb),
    }
}

/// 在 train 中寻找与 query 汉明距离最小的 k 个描述符
///
/// 返回 (下标, 距离)，按距离从小到大排列，长度不超过 `min(k, train.len())`
pub fn knn_hamming(query: &Descriptor, train: &[Descriptor], k: usize) -> Vec<(usize, u32)> {
    assert!(k <= 8, "k must be at most 8");
    let mut dis = [u32::MAX; 8];
    let mut idx = [0; 8];
    for (i, chunk) in train.iter().enumerate() {
        let d = hamming::<256>(query, chunk);
        if d > dis[0] {
            continue;
        }
        // 维护一个长度为 k 的单调递减数组，最大的元素在最前面
        for j in (0..k).rev() {
            if d < dis[j] {
                dis[..=j].rotate_left(1);
                dis[j] = d;
                idx[..=j].rotate_left(1);
                idx[j] = i;
                break;
            }
        }
    }
    idx.into_iter().zip(dis).filter(|(_, d)| *d != u32::MAX).rev().take(k).collect()
}
