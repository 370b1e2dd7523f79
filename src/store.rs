//! 索引文件的格式与读写
//!
//! 每个 (目录, 提取器) 对应一个索引文件，默认位于
//! `<目录>/.index/image_index_<提取器名>.bin`。

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::extractor::Features;

/// 索引目录名
pub const INDEX_DIR: &str = ".index";
/// 索引文件名前缀
pub const INDEX_PREFIX: &str = "image_index_";
/// 索引文件后缀
pub const INDEX_EXT: &str = "bin";

const MAGIC: &[u8; 7] = b"IMFIND\0";
/// 2: 嵌入子向量末尾附加平均亮度
const FORMAT_VERSION: u8 = 2;

/// 一个索引的全部内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// 生成这些特征的提取器名称
    pub extractor: String,
    /// 图片绝对路径 => 特征
    pub entries: BTreeMap<String, Features>,
    /// 创建时间，精确到秒
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_at: DateTime<Utc>,
}

impl IndexRecord {
    pub fn new(extractor: impl Into<String>) -> Self {
        Self { extractor: extractor.into(), entries: BTreeMap::new(), created_at: Utc::now().trunc_subsecs(0) }
    }

    /// 将创建时间更新为当前时间
    pub fn touch(&mut self) {
        self.created_at = Utc::now().trunc_subsecs(0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(MAGIC.len() + 1);
        buf.extend_from_slice(MAGIC);
        buf.push(FORMAT_VERSION);
        bincode::serialize_into(&mut buf, self).map_err(|e| EngineError::Io(std::io::Error::other(e)))?;
        Ok(buf)
    }

    /// 从字节中解码，`path` 仅用于错误信息
    pub fn decode(bytes: &[u8], path: &Path) -> Result<Self> {
        let corrupt = |reason: String| EngineError::IndexCorrupt { path: path.to_path_buf(), reason };
        let Some(body) = bytes.strip_prefix(MAGIC.as_slice()) else {
            return Err(corrupt("文件头不正确".to_string()));
        };
        match body.split_first() {
            Some((&FORMAT_VERSION, body)) => {
                bincode::deserialize(body).map_err(|e| corrupt(e.to_string()))
            }
            Some((version, _)) => Err(corrupt(format!("不支持的版本 {version}"))),
            None => Err(corrupt("文件不完整".to_string())),
        }
    }

    /// 写入索引文件，覆盖已有内容
    ///
    /// 先写入临时文件再重命名，读取方不会看到写了一半的文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut tmp_file = path.as_os_str().to_owned();
        tmp_file.push(".tmp");
        let tmp_file = PathBuf::from(tmp_file);

        fs::write(&tmp_file, self.encode()?)?;
        fs::rename(&tmp_file, path)?;
        debug!("写入索引 {}，共 {} 条记录", path.display(), self.len());
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => EngineError::IndexNotFound(path.to_path_buf()),
            _ => EngineError::Io(e),
        })?;
        let record = Self::decode(&bytes, path)?;
        debug!("读取索引 {}，共 {} 条记录", path.display(), record.len());
        Ok(record)
    }
}

/// 将提取器名称转换为可用于文件名的形式
pub fn slugify(identity: &str) -> String {
    let mut slug = String::with_capacity(identity.len());
    for c in identity.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    slug
}

/// 目录下指定提取器的默认索引路径
pub fn default_index_path(folder: impl AsRef<Path>, identity: &str) -> PathBuf {
    folder
        .as_ref()
        .join(INDEX_DIR)
        .join(format!("{INDEX_PREFIX}{}.{INDEX_EXT}", slugify(identity)))
}

/// 目录中已存在的索引文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexFile {
    pub path: PathBuf,
    /// 文件名中的提取器部分
    pub slug: String,
}

/// 列出目录中已存在的索引，按文件名排序
pub fn list_indexes(folder: impl AsRef<Path>) -> Vec<IndexFile> {
    let Ok(entries) = fs::read_dir(folder.as_ref().join(INDEX_DIR)) else {
        return vec![];
    };
    let mut indexes = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            let slug = name.strip_prefix(INDEX_PREFIX)?.strip_suffix(&format!(".{INDEX_EXT}"))?;
            path.is_file().then(|| IndexFile { slug: slug.to_string(), path: path.clone() })
        })
        .collect::<Vec<_>>();
    indexes.sort_by(|a, b| a.path.cmp(&b.path));
    indexes
}
