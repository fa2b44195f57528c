use clap::Args;
use simple_error::{SimpleResult, bail};

#[derive(Args)]
pub struct SharedSettings {
    /// Total number of cores available to each phase. Defaults to all logical cpus detected.
    #[arg(long = "cores", global = true, value_name = "CORE_COUNT")]
    core_count_option: Option<usize>,

    /// This value will be filled in by core_count_option
    #[arg(hide = true, default_value_t = 0)]
    pub core_count: usize,

    /// Remove an existing work directory before starting, so that every phase is rerun
    #[arg(long, global = true)]
    pub clobber: bool,

    /// Turn on extra debug logging
    ///
    /// This option enables extra logging intended for debugging only. Worker messages are
    /// easier to follow when --cores is set to 1.
    ///
    #[arg(long, global = true)]
    pub debug: bool,
}

pub fn validate_and_fix_shared_settings(
    mut settings: SharedSettings,
) -> SimpleResult<SharedSettings> {
    settings.core_count = match settings.core_count_option {
        Some(count) => {
            if count == 0 {
                bail!("--cores argument must be greater than 0");
            }
            count
        }
        None => num_cpus::get(),
    };

    Ok(settings)
}
