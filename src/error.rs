use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// 引擎层面的错误
///
/// 单个文件的提取失败不会出现在这里，它们在各组件内部被记录并跳过。
/// 用户取消不是错误，见 [`crate::worker::RunEvent::Cancelled`]。
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("无法提取图片特征: {}", .0.display())]
    FeatureExtractionFailed(PathBuf),
    #[error("索引不存在: {}", .0.display())]
    IndexNotFound(PathBuf),
    #[error("索引已损坏 {}: {reason}", path.display())]
    IndexCorrupt { path: PathBuf, reason: String },
    #[error("索引不可用 {}: {source}", path.display())]
    IndexUnavailable {
        path: PathBuf,
        #[source]
        source: Box<EngineError>,
    },
    #[error("目录中没有找到图片: {}", .0.display())]
    NoImagesFound(PathBuf),
    #[error("未知的提取器: {0}")]
    UnknownExtractor(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// 将存储层错误包装为 `IndexUnavailable`
    pub fn unavailable(path: impl Into<PathBuf>, source: EngineError) -> Self {
        match source {
            e @ EngineError::IndexUnavailable { .. } => e,
            source => EngineError::IndexUnavailable { path: path.into(), source: Box::new(source) },
        }
    }
}
