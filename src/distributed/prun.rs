//! Entry point for running one parallel phase of a pipeline
//!
//! A phase is sized against the discovered node resources, dispatched to the configured backend,
//! and marked complete with a checkpoint file when it finishes without error. Rerunning a phase
//! whose checkpoint exists skips sizing and runs it as a single local job.
//!

use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use hhmmss::Hhmmss;
use log::{debug, info};
use simple_error::{SimpleResult, try_with};

use super::cluster::ClusterRunner;
use super::clusterk::ClusterkRunner;
use super::multi::MulticoreRunner;
use super::resources::calculate;
use super::system::get_info;
use super::tasks::TaskRegistry;
use super::worker_log::LogSink;
use super::{Dirs, JobSizing, ParallelConfig, ParallelRunner, ParallelType};
use crate::config::RunConfig;
use crate::os_utils::create_dir_all;
use crate::run_stats::{PhaseStats, append_phase_stats};
use crate::work_item::WorkItem;

pub const CHECKPOINT_DIR: &str = "checkpoints_parallel";

/// Shared state for all phases of a run
pub struct RunContext<'a> {
    pub registry: &'a TaskRegistry,
    pub config: &'a RunConfig,
    pub dirs: &'a Dirs,
}

#[derive(Clone, Debug)]
pub struct PhaseOptions {
    /// Checkpoint name, unnamed phases are always rerun
    pub name: Option<String>,

    /// Expected number of dispatched tasks per input item
    pub multiplier: usize,

    /// Upper limit on cores per job, defaults to the discovered node cores
    pub max_multicore: Option<usize>,
}

impl Default for PhaseOptions {
    fn default() -> Self {
        Self {
            name: None,
            multiplier: 1,
            max_multicore: None,
        }
    }
}

impl PhaseOptions {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }
}

pub fn checkpoint_file(dirs: &Dirs, name: &str) -> Utf8PathBuf {
    dirs.work.join(CHECKPOINT_DIR).join(format!("{name}.done"))
}

fn write_checkpoint(filename: &Utf8Path) -> SimpleResult<()> {
    if let Some(dir) = filename.parent() {
        create_dir_all(dir, "checkpoint");
    }
    try_with!(
        std::fs::write(filename, "done\n"),
        "Unable to write checkpoint file: '{filename}'"
    );
    Ok(())
}

/// Run `body` with a parallel runner for one phase
///
/// The caller's parallel configuration is never modified, the sized configuration is only
/// visible through the runner. The checkpoint and phase stats are written only if `body`
/// succeeds. Cluster resources are released when the runner goes out of scope, whether or not
/// `body` succeeds.
///
pub fn start<T>(
    context: &RunContext,
    parallel: &ParallelConfig,
    items: &[WorkItem],
    options: &PhaseOptions,
    body: impl FnOnce(&dyn ParallelRunner) -> SimpleResult<T>,
) -> SimpleResult<T> {
    let start_time = Instant::now();
    let checkpoint = options
        .name
        .as_deref()
        .map(|x| checkpoint_file(context.dirs, x));
    let phase_label = options.name.as_deref().unwrap_or("parallel");

    let sink = LogSink::new();
    let log = sink.worker_log(phase_label);

    let (result, sized) = if checkpoint.as_ref().is_some_and(|x| x.exists()) {
        info!("Running locally, checkpoint passed: {phase_label}");
        let mut sized = parallel.clone();
        sized.sizing = Some(JobSizing {
            cores_per_job: 1,
            num_jobs: 1,
            mem: sized.mem().to_string(),
            mem_pct: 1.0,
        });
        sized.checkpointed = true;
        let runner = MulticoreRunner::new(sized.clone(), context.registry, log);
        (body(&runner), sized)
    } else {
        let sysinfo = get_info(context.dirs, parallel, &context.config.resources)?;
        let max_multicore = options.max_multicore.or(sysinfo.cores).unwrap_or(1);
        let sized = calculate(
            parallel,
            items,
            &sysinfo,
            context.config,
            options.multiplier,
            Some(max_multicore),
        )?;
        info!(
            "Phase {phase_label}: {} jobs with {} cores and {}Gb each on {} backend",
            sized.num_jobs(),
            sized.cores_per_job(),
            sized.mem(),
            sized.parallel_type
        );

        let result = match sized.parallel_type {
            ParallelType::Cluster if sized.is_distributed() => {
                let runner = ClusterRunner::create(
                    &sized,
                    context.dirs,
                    context.config,
                    context.registry,
                    log,
                    phase_label,
                    sysinfo.cores,
                )?;
                body(&runner)
            }
            ParallelType::Clusterk => {
                let runner = ClusterkRunner::create(&sized, context.registry, log);
                body(&runner)
            }
            _ => {
                let runner = MulticoreRunner::new(sized.clone(), context.registry, log);
                body(&runner)
            }
        };
        (result, sized)
    };

    let message_count = sink.finish();
    debug!("Phase {phase_label} logged {message_count} worker messages");

    let result = result?;
    if let Some(checkpoint) = checkpoint.as_ref() {
        if !checkpoint.exists() {
            write_checkpoint(checkpoint)?;
        }
    }

    let elapsed = start_time.elapsed();
    info!("Phase {phase_label} completed in {}", elapsed.hhmmssxxx());
    append_phase_stats(
        &context.dirs.work.join("provenance"),
        PhaseStats {
            name: options.name.clone(),
            backend: sized.parallel_type.to_string(),
            checkpointed: sized.checkpointed,
            cores_per_job: sized.cores_per_job(),
            num_jobs: sized.num_jobs(),
            mem: sized.mem().to_string(),
            elapsed_secs: elapsed.as_secs_f64(),
        },
    )?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distributed::tasks::MACHINE_INFO_TASK;
    use crate::distributed::{LOCAL_RUN_QUEUE, Scheduler, TaskValue};
    use crate::run_stats::read_phase_stats;

    struct TestRun {
        _dir: tempfile::TempDir,
        dirs: Dirs,
        registry: TaskRegistry,
        config: RunConfig,
    }

    impl TestRun {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let dirs = Dirs::new(Utf8Path::from_path(dir.path()).unwrap());
            Self {
                _dir: dir,
                dirs,
                registry: TaskRegistry::standard(),
                config: RunConfig::default(),
            }
        }

        fn context(&self) -> RunContext<'_> {
            RunContext {
                registry: &self.registry,
                config: &self.config,
                dirs: &self.dirs,
            }
        }

        fn items(&self, count: usize) -> Vec<WorkItem> {
            (0..count)
                .map(|i| WorkItem::new(&format!("s{i}"), self.config.clone()))
                .collect()
        }
    }

    #[test]
    fn test_checkpoint_short_circuit() {
        let run = TestRun::new();
        let parallel = ParallelConfig::new(ParallelType::Local, 2);
        let options = PhaseOptions::named("align");

        let sizing = start(&run.context(), &parallel, &run.items(3), &options, |runner| {
            Ok(runner.parallel().clone())
        })
        .unwrap();
        assert!(!sizing.checkpointed);
        assert!(sizing.num_jobs() * sizing.cores_per_job() <= 2);
        assert!(parallel.sizing.is_none());

        let checkpoint = checkpoint_file(&run.dirs, "align");
        assert_eq!(std::fs::read_to_string(&checkpoint).unwrap(), "done\n");

        // Sizing an empty item list is an error, so this only succeeds if sizing is skipped
        let sizing = start(&run.context(), &parallel, &[], &options, |runner| {
            Ok(runner.parallel().clone())
        })
        .unwrap();
        assert!(sizing.checkpointed);
        assert_eq!(sizing.cores_per_job(), 1);
        assert_eq!(sizing.num_jobs(), 1);

        let stats = read_phase_stats(&run.dirs.work.join("provenance")).unwrap();
        assert_eq!(stats.len(), 2);
        assert!(stats[1].checkpointed);
    }

    #[test]
    fn test_corrupt_phase_stats() {
        let run = TestRun::new();
        let parallel = ParallelConfig::new(ParallelType::Local, 2);
        let provenance_dir = run.dirs.work.join("provenance");
        std::fs::create_dir_all(&provenance_dir).unwrap();
        std::fs::write(provenance_dir.join(crate::run_stats::PHASE_STATS_FILENAME), "[{").unwrap();

        let result = start(
            &run.context(),
            &parallel,
            &run.items(2),
            &PhaseOptions::named("stats"),
            |_| Ok(()),
        );
        assert!(result.is_err());
        assert!(checkpoint_file(&run.dirs, "stats").exists());
    }

    #[test]
    fn test_failed_phase_not_checkpointed() {
        let run = TestRun::new();
        let parallel = ParallelConfig::new(ParallelType::Local, 2);
        let options = PhaseOptions::named("call");

        let result: SimpleResult<()> =
            start(&run.context(), &parallel, &run.items(2), &options, |_| {
                Err(simple_error::SimpleError::new("worker failed"))
            });
        assert!(result.is_err());
        assert!(!checkpoint_file(&run.dirs, "call").exists());
        assert!(read_phase_stats(&run.dirs.work.join("provenance")).unwrap().is_empty());

        // Unnamed phases never write a checkpoint
        start(&run.context(), &parallel, &run.items(2), &PhaseOptions::default(), |_| Ok(()))
            .unwrap();
        assert!(!run.dirs.work.join(CHECKPOINT_DIR).exists());
    }

    #[test]
    fn test_empty_items_error() {
        let run = TestRun::new();
        let parallel = ParallelConfig::new(ParallelType::Local, 2);
        let result = start(&run.context(), &parallel, &[], &PhaseOptions::default(), |_| Ok(()));
        assert!(result.is_err());
    }

    #[test]
    fn test_backend_selection() {
        let run = TestRun::new();

        // Cluster configurations on the local run queue stay local
        let mut parallel = ParallelConfig::new(ParallelType::Cluster, 2);
        parallel.scheduler = Some(Scheduler::Slurm);
        parallel.queue = Some(LOCAL_RUN_QUEUE.to_string());
        let out = start(&run.context(), &parallel, &run.items(1), &PhaseOptions::default(), |runner| {
            assert!(!runner.parallel().is_distributed());
            runner.run_parallel(MACHINE_INFO_TASK, vec![vec![TaskValue::Text("x".to_string())]])
        })
        .unwrap();
        assert!(matches!(out[..], [TaskValue::Machine(_)]));

        let mut parallel = ParallelConfig::new(ParallelType::Clusterk, 2);
        parallel.wrapper = Some("timed".to_string());
        let backend = start(&run.context(), &parallel, &run.items(1), &PhaseOptions::default(), |runner| {
            runner.run_parallel(MACHINE_INFO_TASK, vec![vec![TaskValue::Text("x".to_string())]])?;
            Ok(runner.parallel().parallel_type)
        })
        .unwrap();
        assert_eq!(backend, ParallelType::Clusterk);
    }
}
