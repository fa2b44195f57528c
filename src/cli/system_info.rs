use camino::Utf8PathBuf;
use clap::Args;
use const_format::concatcp;
use simple_error::{SimpleResult, bail};

use super::parallel::{ParallelSettings, validate_parallel_settings};
use super::utils::check_optional_filename;
use crate::distributed::ParallelType;

#[derive(Args)]
pub struct SystemInfoSettings {
    /// Work directory the node resource cache is written to
    #[arg(long, value_name = "DIR", default_value = concatcp!(env!("CARGO_PKG_NAME"), "_work"))]
    pub work_dir: Utf8PathBuf,

    /// Run configuration in YAML format, used for its resource settings
    #[arg(long = "config", value_name = "FILE")]
    pub run_filename: Option<Utf8PathBuf>,

    #[command(flatten)]
    pub parallel: ParallelSettings,
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
/// Assumes that the logger is not setup
///
pub fn validate_and_fix_system_info_settings(
    settings: SystemInfoSettings,
) -> SimpleResult<SystemInfoSettings> {
    check_optional_filename(settings.run_filename.as_deref(), "run configuration")?;
    if settings.parallel.parallel_type != ParallelType::Cluster {
        bail!("System information is only collected for the cluster backend, use '--parallel cluster'");
    }
    validate_parallel_settings(&settings.parallel)?;
    Ok(settings)
}
