use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use crate::cache::IndexCache;
use crate::cli::{SubCommandExtend, drive};
use crate::config::{ExtractorOptions, Opts};
use crate::indexer::Indexer;
use crate::worker::spawn_index;

#[derive(Parser, Debug, Clone)]
pub struct IndexCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    /// 图片所在目录，不包括子目录
    pub folder: PathBuf,
    /// 只为新增的图片提取特征，已有的记录保持不变
    #[arg(short, long)]
    pub update: bool,
    /// 索引文件路径，默认为 `<目录>/.index/image_index_<提取器名>.bin`
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,
}

impl SubCommandExtend for IndexCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let cache = Arc::new(IndexCache::new());
        let mut indexer = Indexer::new(&self.folder, self.extractor.extractor.create()).update(self.update);
        if let Some(output) = &self.output {
            indexer = indexer.output(output);
        }

        if let Some(path) = drive(spawn_index(indexer, cache.clone()), "正在建立索引").await? {
            let record = cache.load(&path)?;
            println!("索引已保存到 {}，共 {} 张图片", path.display(), record.len());
        } else {
            println!("已取消，没有写入索引");
        }
        Ok(())
    }
}
