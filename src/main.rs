mod cli;
mod config;
mod distributed;
mod globals;
mod log_utils;
mod logger;
mod os_utils;
mod pipeline;
mod region;
mod run_stats;
mod work_item;

use std::{error, process};

use hhmmss::Hhmmss;
use log::info;

use crate::cli::{Commands, EngineSettings, RunSettings, SharedSettings, SystemInfoSettings};
use crate::config::{RunConfig, read_run_file};
use crate::distributed::cluster::run_engine;
use crate::distributed::prun::RunContext;
use crate::distributed::system::{get_cache_file, write_info};
use crate::distributed::tasks::TaskRegistry;
use crate::distributed::Dirs;
use crate::globals::{PROGRAM_NAME, PROGRAM_VERSION};
use crate::logger::setup_work_dir_and_logger;
use crate::pipeline::{PipelineOptions, run_region_pipeline};
use crate::region::{ContigList, Region};

/// Run system configuration steps prior to starting any other program logic
///
fn system_configuration_prelude() {
    os_utils::attempt_max_open_file_limit();
}

fn run_pipeline(shared: &SharedSettings, settings: &RunSettings) -> Result<(), Box<dyn error::Error>> {
    let run_file = read_run_file(&settings.run_filename)?;
    let contigs = ContigList::from_fai(&settings.fai_filename)?;
    let targets = settings
        .target_region_list
        .iter()
        .map(|x| Region::from_region_str(&contigs, x))
        .collect::<Result<Vec<_>, _>>()?;

    let options = PipelineOptions {
        segment_size: settings.segment_size,
        targets,
        joint: settings.joint,
        debug_split: settings.debug_split,
    };
    let dirs = Dirs::new(&settings.work_dir);
    let parallel = settings.parallel.to_parallel_config(shared.core_count);
    run_region_pipeline(&run_file, &settings.fai_filename, &dirs, &parallel, &options)?;
    Ok(())
}

fn run_system_info(
    shared: &SharedSettings,
    settings: &SystemInfoSettings,
) -> Result<(), Box<dyn error::Error>> {
    let config = match &settings.run_filename {
        Some(x) => read_run_file(x)?.config,
        None => RunConfig::default(),
    };
    let dirs = Dirs::new(&settings.work_dir);
    let registry = TaskRegistry::standard();
    let context = RunContext {
        registry: &registry,
        config: &config,
        dirs: &dirs,
    };
    let parallel = settings.parallel.to_parallel_config(shared.core_count);
    write_info(&context, &parallel)?;
    info!(
        "System information available in: '{}'",
        get_cache_file(&dirs, &parallel)
    );
    Ok(())
}

fn run_cluster_engine(settings: &EngineSettings) -> Result<(), Box<dyn error::Error>> {
    run_engine(
        &TaskRegistry::standard(),
        &settings.request_filename,
        &settings.response_filename,
        settings.compressed,
    )?;
    Ok(())
}

fn run(settings: &cli::Settings) -> Result<(), Box<dyn error::Error>> {
    if let Commands::Engine(x) = &settings.command {
        return run_cluster_engine(x);
    }

    info!("Starting {PROGRAM_NAME} {PROGRAM_VERSION}");
    info!(
        "cmdline: {}",
        std::env::args().collect::<Vec<_>>().join(" ")
    );
    info!("Running with {} cores", settings.shared.core_count);

    let start = std::time::Instant::now();

    match &settings.command {
        Commands::Run(x) => {
            run_pipeline(&settings.shared, x)?;
        }
        Commands::SystemInfo(x) => {
            run_system_info(&settings.shared, x)?;
        }
        Commands::Engine(_) => {}
    }

    info!(
        "{PROGRAM_NAME} completed. Total Runtime: {}",
        start.elapsed().hhmmssxxx()
    );
    Ok(())
}

fn main() {
    system_configuration_prelude();

    let settings = cli::validate_and_fix_settings(cli::parse_settings());

    // Setup logger, including creation of the work directory for the log file:
    setup_work_dir_and_logger(
        settings.get_work_dir(),
        settings.shared.clobber,
        settings.shared.debug,
    );

    if let Err(err) = run(&settings) {
        eprintln!("{err}");
        process::exit(2);
    }
}
