use clap::Parser;
use imfind::cli::SubCommandExtend;
use imfind::config::{Opts, SubCommand};
use imfind::metrics;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    let result = match &opts.subcmd {
        SubCommand::Index(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::List(config) => config.run(&opts).await,
        SubCommand::Info(config) => config.run(&opts).await,
        SubCommand::Compare(config) => config.run(&opts).await,
        SubCommand::Extractors(config) => config.run(&opts).await,
    };

    if opts.metrics {
        eprint!("{}", metrics::gather_text());
    }
    result
}
