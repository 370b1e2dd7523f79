use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::Parser;
use log::{debug, warn};

use crate::cache::IndexCache;
use crate::cli::{SubCommandExtend, drive};
use crate::config::{Opts, OutputFormat, SearchOptions};
use crate::export;
use crate::extractor::{ExtractorKind, FeatureExtractor};
use crate::search::SearchResult;
use crate::store::default_index_path;
use crate::worker::{spawn_index_search, spawn_scan};

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub search: SearchOptions,
    /// 使用的特征提取器，使用索引时默认与索引一致，否则为 combined
    #[arg(short, long, value_enum)]
    pub extractor: Option<ExtractorKind>,
    /// 被搜索的图片路径
    pub image: PathBuf,
    /// 被搜索的目录
    #[arg(short, long, value_name = "DIR")]
    pub folder: Option<PathBuf>,
    /// 使用目录中与提取器对应的索引，而不是逐一比较
    #[arg(short = 'u', long, requires = "folder")]
    pub use_index: bool,
    /// 索引文件路径，可以指定多次，结果会合并
    #[arg(short, long = "index", value_name = "PATH", conflicts_with = "use_index")]
    pub indexes: Vec<PathBuf>,
}

impl SearchCommand {
    /// 未指定提取器时，使用第一个可以读取的索引所用的提取器
    fn resolve_extractor(&self, cache: &IndexCache) -> ExtractorKind {
        if let Some(kind) = self.extractor {
            return kind;
        }
        self.indexes
            .iter()
            .filter_map(|key| cache.load(key).ok())
            .find_map(|record| ExtractorKind::from_identity(&record.extractor).ok())
            .unwrap_or(ExtractorKind::Combined)
    }

    fn export(&self, extractor: &dyn FeatureExtractor, results: &[SearchResult]) -> Result<()> {
        let Some(base) = &self.search.export else {
            return Ok(());
        };
        let query_name = self.image.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let dir = export::create_results_folder(base, &query_name)?;
        export::save_results(&self.image, results, &dir, extractor.name(), self.search.threshold)?;
        println!("结果已导出到 {}", dir.display());
        Ok(())
    }
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let cache = Arc::new(IndexCache::new());
        let kind = self.resolve_extractor(&cache);
        let extractor = kind.create();
        let (threshold, count) = (self.search.threshold, self.search.count);
        debug!("使用提取器 {}", extractor.name());

        let mut keys = self.indexes.clone();
        if self.use_index {
            if let Some(folder) = &self.folder {
                keys.push(default_index_path(folder, extractor.name()));
            }
        }

        let results = if !keys.is_empty() {
            let handle = spawn_index_search(
                self.image.clone(),
                keys,
                extractor.clone(),
                cache,
                threshold,
                count,
            );
            let Some(found) = drive(handle, "正在搜索索引").await? else {
                println!("搜索已取消");
                return Ok(());
            };
            for (key, e) in &found.errors {
                warn!("跳过索引 {}: {e}", key.display());
                eprintln!("索引不可用: {e}");
            }
            found.results
        } else if let Some(folder) = &self.folder {
            let handle = spawn_scan(self.image.clone(), folder.clone(), extractor.clone(), threshold, count);
            let Some(results) = drive(handle, "正在扫描目录").await? else {
                println!("搜索已取消");
                return Ok(());
            };
            results
        } else {
            bail!("需要指定 --folder 或 --index");
        };

        print_result(&results, self.search.output_format)?;
        self.export(extractor.as_ref(), &results)
    }
}

fn print_result(results: &[SearchResult], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results)?)
        }
        OutputFormat::Table => {
            for result in results {
                println!("{:.2}\t{}", result.score, result.path);
            }
        }
    }
    Ok(())
}
