//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "hugeup")]
#[command(about = "Resumable chunked upload of a large file", long_about = None)]
pub struct Args {
    /// File to upload
    pub file: PathBuf,

    /// Upload API base URL (overrides the config file)
    #[arg(short, long)]
    pub endpoint: Option<String>,

    /// Chunk size in bytes
    #[arg(long)]
    pub chunk_size: Option<u64>,

    /// Retries per chunk
    #[arg(long)]
    pub retries: Option<u32>,

    /// Seconds to wait before a retry
    #[arg(long)]
    pub retry_delay: Option<u64>,

    /// Precomputed MD5 of the file; computed when omitted
    #[arg(long)]
    pub md5: Option<String>,

    /// Extra request header, e.g. `Authorization=Bearer xyz`
    #[arg(long = "header", value_name = "K=V", value_parser = parse_key_value)]
    pub headers: Vec<(String, String)>,

    /// Extra init field, e.g. `channel_id=42`
    #[arg(long = "field", value_name = "K=V", value_parser = parse_key_value)]
    pub fields: Vec<(String, String)>,

    /// Checkpoint file: resumed from when present, written on failure or
    /// interrupt, removed on success
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Parses `KEY=VALUE`. The value may itself contain `=`.
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{s}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
