use camino::Utf8PathBuf;
use clap::Args;
use const_format::concatcp;
use simple_error::{SimpleResult, bail};

use super::parallel::{ParallelSettings, validate_parallel_settings};
use super::utils::check_required_filename;

#[derive(Args)]
pub struct RunSettings {
    /// Directory for all run output, checkpoints and logs
    ///
    /// An existing work directory is reused, so a failed run can be restarted from its last
    /// completed phase.
    ///
    #[arg(long, value_name = "DIR", default_value = concatcp!(env!("CARGO_PKG_NAME"), "_work"))]
    pub work_dir: Utf8PathBuf,

    /// Run configuration in YAML format, listing samples, command templates and resources
    #[arg(long = "config", value_name = "FILE")]
    pub run_filename: Utf8PathBuf,

    /// Samtools faidx index of the genome reference, used to define work regions
    #[arg(long = "fai", value_name = "FILE")]
    pub fai_filename: Utf8PathBuf,

    /// Size of the genome segments each sample is split into
    #[arg(long, default_value_t = 10_000_000)]
    pub segment_size: u64,

    /// Restrict processing to one or more target regions, in 'chr:start-end' format
    #[arg(long = "target-region", value_name = "REGION")]
    pub target_region_list: Vec<String>,

    /// Split and combine all samples sharing a 'metadata.batch' name as one unit
    #[arg(long)]
    pub joint: bool,

    /// Print every split plan to stderr
    #[arg(hide = true, long)]
    pub debug_split: bool,

    #[command(flatten)]
    pub parallel: ParallelSettings,
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_run_settings(settings: RunSettings) -> SimpleResult<RunSettings> {
    check_required_filename(settings.run_filename.as_str(), "run configuration")?;
    check_required_filename(settings.fai_filename.as_str(), "reference index")?;
    if settings.segment_size == 0 {
        bail!("--segment-size argument must be greater than 0");
    }
    validate_parallel_settings(&settings.parallel)?;
    Ok(settings)
}
