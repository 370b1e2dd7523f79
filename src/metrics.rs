use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imfind_search_count", "count of the searches", &["mode"]).unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imfind_search_duration",
        "duration of the per-query search in seconds",
        &["mode"]
    )
    .unwrap()
});

static METRIC_INDEXED_IMAGES: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("imfind_indexed_images", "count of the images added to an index").unwrap()
});

static METRIC_INDEX_CACHE_LOADS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("imfind_index_cache_loads", "count of the index files read from disk").unwrap()
});

/// 搜索方式，作为指标的标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Index,
    MultiIndex,
    Scan,
}

impl SearchMode {
    fn as_str(self) -> &'static str {
        match self {
            SearchMode::Index => "index",
            SearchMode::MultiIndex => "multi_index",
            SearchMode::Scan => "scan",
        }
    }
}

pub fn inc_search_count(mode: SearchMode) {
    METRIC_SEARCH_COUNT.with_label_values(&[mode.as_str()]).inc();
}

pub fn inc_search_duration(mode: SearchMode, duration: f32) {
    METRIC_SEARCH_DURATION
        .with_label_values(&[mode.as_str()])
        .observe(duration as f64);
}

pub fn inc_indexed_images(count: usize) {
    METRIC_INDEXED_IMAGES.inc_by(count as u64);
}

pub fn inc_index_loads() {
    METRIC_INDEX_CACHE_LOADS.inc();
}

/// 以文本格式导出当前所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&gather()).unwrap_or_default()
}
