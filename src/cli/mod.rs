mod engine;
mod parallel;
mod run;
mod shared;
mod system_info;
mod utils;

use camino::Utf8Path;
use chrono::Datelike;
use clap::{Parser, Subcommand};
use simple_error::{SimpleResult, bail};

use self::engine::validate_and_fix_engine_settings;
pub use self::engine::EngineSettings;
use self::run::validate_and_fix_run_settings;
pub use self::run::RunSettings;
use self::shared::validate_and_fix_shared_settings;
pub use self::shared::SharedSettings;
use self::system_info::validate_and_fix_system_info_settings;
pub use self::system_info::SystemInfoSettings;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command template over every genome region of each sample, then combine the region
    /// outputs per sample
    Run(RunSettings),

    /// Collect and cache cluster node resources for a scheduler queue
    SystemInfo(SystemInfoSettings),

    /// Execute one task request on a cluster node
    #[command(hide = true)]
    Engine(EngineSettings),
}

#[derive(Parser)]
#[command(
    author,
    version,
    about,
    after_help = format!("Copyright (C) 2016-{}
This program comes with ABSOLUTELY NO WARRANTY.", chrono::Utc::now().year()),
    help_template = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}"
)]
#[clap(propagate_version = true, rename_all = "kebab_case")]
pub struct Settings {
    #[command(flatten)]
    pub shared: SharedSettings,

    #[command(subcommand)]
    pub command: Commands,
}

impl Settings {
    /// Work directory for the command, engines have none because they only write their response
    pub fn get_work_dir(&self) -> Option<&Utf8Path> {
        match &self.command {
            Commands::Run(x) => Some(x.work_dir.as_path()),
            Commands::SystemInfo(x) => Some(x.work_dir.as_path()),
            Commands::Engine(_) => None,
        }
    }
}

/// Checks if a directory does not exist
///
pub fn check_novel_dirname(dirname: &Utf8Path, label: &str) -> SimpleResult<()> {
    if dirname.exists() {
        bail!("{} already exists: \"{}\"", label, dirname);
    }
    Ok(())
}

/// Validate settings and update parameters that can't be processed by clap
///
/// Parts of this process assume logging is already setup
///
pub fn validate_and_fix_settings_impl(mut settings: Settings) -> SimpleResult<Settings> {
    settings.shared = validate_and_fix_shared_settings(settings.shared)?;

    settings.command = match settings.command {
        Commands::Run(x) => {
            let x = validate_and_fix_run_settings(x)?;
            Commands::Run(x)
        }
        Commands::SystemInfo(x) => {
            let x = validate_and_fix_system_info_settings(x)?;
            Commands::SystemInfo(x)
        }
        Commands::Engine(x) => {
            let x = validate_and_fix_engine_settings(x)?;
            Commands::Engine(x)
        }
    };

    Ok(settings)
}

/// Validate settings and update to parameters that can't be processed automatically by clap.
///
pub fn validate_and_fix_settings(settings: Settings) -> Settings {
    match validate_and_fix_settings_impl(settings) {
        Ok(x) => x,
        Err(msg) => {
            eprintln!("Invalid command-line setting: {}", msg);
            std::process::exit(exitcode::USAGE);
        }
    }
}

pub fn parse_settings() -> Settings {
    Settings::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_command() {
        let settings = Settings::parse_from([
            "parasplit",
            "engine",
            "--request",
            "a.request",
            "--response",
            "a.response",
            "--compressed",
        ]);
        assert!(settings.get_work_dir().is_none());
        match settings.command {
            Commands::Engine(x) => {
                assert!(x.compressed);
                assert_eq!(x.response_filename, "a.response");
            }
            _ => panic!("unexpected command"),
        }
    }
}
