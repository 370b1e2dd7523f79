use std::path::PathBuf;

use chrono::Local;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::store::{IndexRecord, list_indexes};

#[derive(Parser, Debug, Clone)]
pub struct ListCommand {
    /// 图片所在目录
    pub folder: PathBuf,
}

impl SubCommandExtend for ListCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        let indexes = list_indexes(&self.folder);
        if indexes.is_empty() {
            println!("{} 中没有索引", self.folder.display());
            return Ok(());
        }
        for index in indexes {
            match IndexRecord::load(&index.path) {
                Ok(record) => println!(
                    "{}\t{}\t{}\t{}",
                    record.extractor,
                    record.len(),
                    record.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    index.path.display()
                ),
                Err(e) => println!("{}\t无法读取: {e}", index.slug),
            }
        }
        Ok(())
    }
}
