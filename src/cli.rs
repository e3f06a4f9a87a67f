use crate::sequence::StateSource;
use crate::storage::CannedAcl;
use clap::{Args, Parser, Subcommand};
use planet_dumper_common::CleanupMode;
use reqwest::Url;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "planet-dumper")]
#[command(author, version, about = "Create and publish OSM planet dumps")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Dump the database, convert it to a planet file and publish it
    Create(CreateArgs),

    /// Dump the database only
    PgDump(PgDumpArgs),

    /// Check that required external tools are available
    CheckTools,
}

/// Arguments shared by every command that dumps a state.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Sequence number, http(s) url or s3://<bucket>/<key> of a state document
    #[arg(short = 's', long)]
    pub state_source: StateSource,

    /// Output name template, supports {state}, {sequenceNumber} and {timestamp}
    #[arg(short = 'f', long, default_value = "{state}.pbf")]
    pub output_format: String,

    /// Working directory cleanup policy
    #[arg(long, default_value = "none")]
    pub cleanup_mode: CleanupMode,

    /// Reuse artifacts left by an earlier run of the same state
    #[arg(short, long)]
    pub resume: bool,

    /// Bucket locked for the duration of the dump stages
    #[arg(long)]
    pub lock_bucket: Option<String>,

    /// Root of the working directories, overrides the config file
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Custom S3 endpoint, overrides the config file
    #[arg(short = 'e', long)]
    pub s3_endpoint: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Bucket the planet file is uploaded to
    #[arg(short = 'b', long)]
    pub s3_bucket_name: String,

    /// Canned ACL of the uploaded object
    #[arg(short = 'a', long)]
    pub s3_acl: Option<CannedAcl>,

    /// Dump server the uploaded planet file is registered with
    #[arg(short = 'd', long, value_parser = parse_web_url)]
    pub dump_server_endpoint: Option<String>,

    /// Extra header sent to the dump server, as key=value
    #[arg(short = 'H', long = "dump-server-header", value_parser = parse_header)]
    pub dump_server_headers: Vec<(String, String)>,

    /// Collect planet file info with the info tool
    #[arg(short = 'i', long)]
    pub info: bool,

    /// Description registered with the dump server
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PgDumpArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Parse a `key=value` header argument.
pub fn parse_header(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid header '{s}', expected key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid header '{s}', the key is empty"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Accept only absolute http(s) urls.
pub fn parse_web_url(s: &str) -> Result<String, String> {
    match Url::parse(s) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.has_host() => Ok(s.to_string()),
        _ => Err(format!("invalid url '{s}', expected an http(s) url")),
    }
}
