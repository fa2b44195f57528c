//! Run tasks in parallel on the local machine
//!

use std::sync::mpsc::channel;

use log::debug;
use simple_error::{SimpleResult, try_with};

use super::resources::calculate;
use super::system::{SystemInfo, combine_machine_info, machine_info};
use super::tasks::{TaskContext, TaskRegistry};
use super::worker_log::WorkerLog;
use super::{
    ParallelConfig, ParallelRunner, ParallelType, Task, TaskArgs, TaskValue, first_item_in_args,
    prepare_items, run_task_inline,
};
use crate::config::RunConfig;
use crate::work_item::WorkItem;

/// Runs each argument list as one job in a pool of `num_jobs` worker threads
///
/// Each job is told to use `cores_per_job` cores, so multithreaded tools called by a task
/// compose with job-level parallelism.
///
pub struct MulticoreRunner<'a> {
    parallel: ParallelConfig,
    registry: &'a TaskRegistry,
    log: WorkerLog,
}

impl<'a> MulticoreRunner<'a> {
    pub fn new(parallel: ParallelConfig, registry: &'a TaskRegistry, log: WorkerLog) -> Self {
        Self {
            parallel,
            registry,
            log,
        }
    }
}

impl ParallelRunner for MulticoreRunner<'_> {
    fn run_task(&self, task: Task, items: Vec<TaskArgs>) -> SimpleResult<Vec<TaskValue>> {
        let items = prepare_items(items, task.name(), self.parallel.cores_per_job());
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let num_jobs = std::cmp::min(self.parallel.num_jobs(), items.len()).max(1);
        debug!(
            "Running task '{}' on {} items with {num_jobs} local jobs",
            task.name(),
            items.len()
        );

        let (registry, parallel) = (self.registry, &self.parallel);
        let item_count = items.len();

        let mut results = if num_jobs == 1 {
            items
                .into_iter()
                .enumerate()
                .map(|(index, args)| {
                    let context = TaskContext {
                        log: self.log.with_label(&format!("{}.{index}", task.name())),
                    };
                    (index, run_task_inline(registry, task, parallel, &context, args))
                })
                .collect::<Vec<_>>()
        } else {
            let worker_pool = try_with!(
                rayon::ThreadPoolBuilder::new().num_threads(num_jobs).build(),
                "Unable to create local worker pool"
            );

            let (tx, rx) = channel();
            worker_pool.scope(|scope| {
                for (index, args) in items.into_iter().enumerate() {
                    let tx = tx.clone();
                    let context = TaskContext {
                        log: self.log.with_label(&format!("{}.{index}", task.name())),
                    };
                    scope.spawn(move |_| {
                        let result = run_task_inline(registry, task, parallel, &context, args);
                        tx.send((index, result)).unwrap();
                    });
                }
            });
            drop(tx);
            rx.into_iter().collect::<Vec<_>>()
        };
        assert_eq!(results.len(), item_count);

        // Restore input order, so the first error reported is the first failed item
        results.sort_by_key(|x| x.0);
        let mut output = Vec::new();
        for (_, result) in results {
            output.extend(result?);
        }
        Ok(output)
    }

    fn parallel(&self) -> &ParallelConfig {
        &self.parallel
    }
}

/// Work items used to size a job pool, taken from the task arguments
pub fn sizing_items(items: &[TaskArgs], config: &RunConfig) -> Vec<WorkItem> {
    items
        .iter()
        .map(|args| match first_item_in_args(args) {
            Some(x) => x.clone(),
            None => WorkItem::new("", config.clone()),
        })
        .collect()
}

/// Run a task over argument lists on the local machine, sizing the job pool if needed
///
/// Without a parallel configuration, the pool is sized from the configured core count
/// (`algorithm.num_cores`, or 1) and local system resources.
///
pub fn run_multicore(
    registry: &TaskRegistry,
    log: &WorkerLog,
    task: Task,
    items: Vec<TaskArgs>,
    config: &RunConfig,
    parallel: Option<ParallelConfig>,
) -> SimpleResult<Vec<TaskValue>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let parallel = match parallel {
        Some(x) if x.sizing.is_some() => x,
        parallel => {
            let parallel = parallel.unwrap_or_else(|| {
                ParallelConfig::new(
                    ParallelType::Local,
                    config.algorithm.num_cores.unwrap_or(1),
                )
            });
            let sysinfo: SystemInfo = combine_machine_info(machine_info())?.into();
            let max_multicore = sysinfo.cores;
            calculate(
                &parallel,
                &sizing_items(&items, config),
                &sysinfo,
                config,
                1,
                max_multicore,
            )?
        }
    };
    MulticoreRunner::new(parallel, registry, log.clone()).run_task(task, items)
}
