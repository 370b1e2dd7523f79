use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::cli::*;
use crate::extractor::ExtractorKind;

#[derive(Parser, Debug, Clone)]
pub struct ExtractorOptions {
    /// 使用的特征提取器
    #[arg(short, long, value_enum, default_value_t = ExtractorKind::Combined)]
    pub extractor: ExtractorKind,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 相似度阈值，低于该值的结果会被过滤
    #[arg(short, long, value_name = "SCORE", default_value_t = 0.7, value_parser = parse_threshold)]
    pub threshold: f32,
    /// 显示的结果数量，0 表示不限制
    #[arg(long, value_name = "COUNT", default_value_t = 0)]
    pub count: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
    /// 将结果图片复制到该目录下的 `results_<查询名>_<时间>` 中
    #[arg(long, value_name = "DIR")]
    pub export: Option<PathBuf>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imfind", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 结束时以 prometheus 文本格式输出统计指标到 stderr
    #[arg(long, global = true)]
    pub metrics: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 为目录中的图片建立索引
    Index(IndexCommand),
    /// 搜索相似的图片，可以使用索引或者直接扫描目录
    Search(SearchCommand),
    /// 列出目录中已有的索引
    List(ListCommand),
    /// 显示索引的信息
    Info(InfoCommand),
    /// 计算两张图片的相似度
    Compare(CompareCommand),
    /// 列出可用的特征提取器
    Extractors(ExtractorsCommand),
}

fn parse_threshold(s: &str) -> Result<f32, String> {
    let value = s.parse::<f32>().map_err(|e| e.to_string())?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("阈值必须在 0 到 1 之间: {s}"))
    }
}
