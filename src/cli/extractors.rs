use clap::{Parser, ValueEnum};

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::extractor::ExtractorKind;

#[derive(Parser, Debug, Clone)]
pub struct ExtractorsCommand {}

impl SubCommandExtend for ExtractorsCommand {
    async fn run(&self, _opts: &Opts) -> anyhow::Result<()> {
        for kind in ExtractorKind::value_variants() {
            let Some(value) = kind.to_possible_value() else { continue };
            let symmetric = if kind.create().is_symmetric() { "对称" } else { "不对称" };
            println!("{}\t{}\t{}", value.get_name(), kind.identity(), symmetric);
        }
        Ok(())
    }
}
