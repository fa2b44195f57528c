//! Methods specific to the parasplit logger
//!

use camino::Utf8Path;
use unwrap::unwrap;

use crate::cli;
use crate::globals::PROGRAM_NAME;
use crate::os_utils::create_dir_all;

/// If debug is true set the default logger to the more verbose debug level
///
fn setup_logger(log_dir: Option<&Utf8Path>, debug: bool) -> Result<(), fern::InitError> {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    let logger = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d][%H:%M:%S]"),
                PROGRAM_NAME,
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr());

    let logger = if let Some(log_dir) = log_dir {
        let log_filename = log_dir.join(PROGRAM_NAME.to_string() + ".log");
        logger.chain(fern::log_file(log_filename)?)
    } else {
        logger
    };

    logger.apply()?;
    Ok(())
}

/// Check and create the work directory, then setup logger to write to its log directory
///
/// An existing work directory is reused unless `clobber` is set, in which case it is removed
/// first. Without a work directory, log messages only go to stderr.
///
/// #Arguments
/// * `debug` - If true use debug log level, and info level otherwise
///
pub fn setup_work_dir_and_logger(work_dir: Option<&Utf8Path>, clobber: bool, debug: bool) {
    // All error messaging in this method needs to account for no logger being setup yet.
    //
    // We try to match the pre-logging error pattern used in the command-line settings verification methods
    //

    let log_dir = work_dir.map(|work_dir| {
        if let Err(msg) = cli::check_novel_dirname(work_dir, "Work directory") {
            if !work_dir.is_dir() {
                eprintln!("Invalid command-line setting: {}", msg);
                std::process::exit(exitcode::USAGE);
            }
            if clobber {
                if let Err(e) = std::fs::remove_dir_all(work_dir) {
                    eprintln!("Can't remove existing work directory '{work_dir}': {e}");
                    std::process::exit(exitcode::CANTCREAT);
                }
            }
        };
        let log_dir = work_dir.join("log");
        create_dir_all(&log_dir, "log");
        log_dir
    });
    unwrap!(setup_logger(log_dir.as_deref(), debug), "Unable to set up logger");
}
