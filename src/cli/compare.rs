use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::SubCommandExtend;
use crate::config::{ExtractorOptions, Opts};
use crate::error::EngineError;
use crate::extractor::{extract_guarded, similarity};

#[derive(Parser, Debug, Clone)]
pub struct CompareCommand {
    #[command(flatten)]
    pub extractor: ExtractorOptions,
    /// 图片1
    pub image1: PathBuf,
    /// 图片2
    pub image2: PathBuf,
}

impl SubCommandExtend for CompareCommand {
    async fn run(&self, _opts: &Opts) -> Result<()> {
        let extractor = self.extractor.extractor.create();
        let extract = |path: &PathBuf| {
            block_in_place(|| extract_guarded(extractor.as_ref(), path))
                .ok_or_else(|| EngineError::FeatureExtractionFailed(path.clone()))
        };
        let f1 = extract(&self.image1)?;
        let f2 = extract(&self.image2)?;

        let score = similarity(extractor.as_ref(), &f1, &f2).unwrap_or(0.);
        println!("{:.4}\t{}", score, extractor.name());
        if !extractor.is_symmetric() {
            let reverse = similarity(extractor.as_ref(), &f2, &f1).unwrap_or(0.);
            println!("{:.4}\t{} (反向)", reverse, extractor.name());
        }
        Ok(())
    }
}
