use clap::Parser;

use workload::wc::TokenPolicy;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Glob pattern for the input text files.
    #[arg(short, long)]
    pub source: String,

    /// Number of concurrent workers. Defaults to available parallelism.
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Maximum attempts per task before it is marked permanently failed.
    #[arg(short, long, default_value_t = 3)]
    pub max_retries: u32,

    /// Number of reduce buckets. Defaults to the worker count.
    #[arg(long)]
    pub n_reduce: Option<usize>,

    /// Name of the workload to run.
    #[arg(long, default_value = "wc")]
    pub workload: String,

    /// Skip records that fail to decode instead of failing their map task.
    #[arg(long)]
    pub skip_bad_records: bool,

    /// Which characters count as word characters during tokenization.
    #[arg(long, value_enum, default_value = "ascii")]
    pub token_policy: TokenPolicy,

    /// Seconds in-flight tasks may keep running after ctrl-c.
    #[arg(long, default_value_t = 5)]
    pub drain_timeout_secs: u64,
}
