pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod extractor;
pub mod hamming;
pub mod indexer;
pub mod metrics;
pub mod scan;
pub mod search;
pub mod store;
pub mod utils;
pub mod worker;

pub use cache::IndexCache;
pub use config::Opts;
pub use error::{EngineError, Result};
pub use extractor::{ExtractorKind, FeatureExtractor, Features};
pub use search::SearchResult;
