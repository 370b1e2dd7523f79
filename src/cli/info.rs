use std::path::{Path, PathBuf};

use chrono::Local;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::store::IndexRecord;

#[derive(Parser, Debug, Clone)]
pub struct InfoCommand {
    /// 索引文件路径
    pub index: PathBuf,
    /// 同时列出所有图片，已删除的图片会被标出
    #[arg(long)]
    pub entries: bool,
}

impl SubCommandExtend for InfoCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let record = IndexRecord::load(&self.index)?;
        let missing = record.entries.keys().filter(|path| !Path::new(path).exists()).count();

        println!("索引: {}", self.index.display());
        println!("提取器: {}", record.extractor);
        println!("图片数量: {}", record.len());
        println!("已删除: {missing}");
        println!(
            "创建时间: {}",
            record.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );

        if self.entries {
            for path in record.entries.keys() {
                let mark = if Path::new(path).exists() { "" } else { "\t(已删除)" };
                println!("{path}{mark}");
            }
        }
        Ok(())
    }
}
