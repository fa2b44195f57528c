use camino::Utf8PathBuf;
use clap::Args;
use simple_error::SimpleResult;

use super::utils::check_required_filename;

/// Settings for a single cluster engine invocation, written by the cluster backend
#[derive(Args)]
pub struct EngineSettings {
    /// Serialized task request
    #[arg(long = "request", value_name = "FILE")]
    pub request_filename: Utf8PathBuf,

    /// Path the serialized task result is written to
    #[arg(long = "response", value_name = "FILE")]
    pub response_filename: Utf8PathBuf,

    /// Request and response are zlib compressed
    #[arg(long)]
    pub compressed: bool,
}

pub fn validate_and_fix_engine_settings(settings: EngineSettings) -> SimpleResult<EngineSettings> {
    check_required_filename(settings.request_filename.as_str(), "engine request")?;
    Ok(settings)
}
