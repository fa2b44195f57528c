//! Run tasks on a remote VM queue
//!
//! Tasks are never called directly by this backend, every item is handed to the configured
//! wrapper together with the queue description.
//!

use simple_error::{SimpleResult, bail};

use super::tasks::{TaskContext, TaskRegistry};
use super::worker_log::WorkerLog;
use super::{ParallelConfig, ParallelRunner, Task, TaskArgs, TaskValue, prepare_items};

/// Remote queue scoped by the phase sizing
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterkQueue {
    pub queue: String,
    pub cores_per_job: usize,
    pub mem: String,
}

impl ClusterkQueue {
    /// Queue description appended to the wrapper arguments
    fn to_args(&self) -> Vec<String> {
        vec![
            format!("queue={}", self.queue),
            format!("cores_per_job={}", self.cores_per_job),
            format!("mem={}", self.mem),
        ]
    }
}

pub struct ClusterkRunner<'a> {
    parallel: ParallelConfig,
    registry: &'a TaskRegistry,
    log: WorkerLog,
    queue: ClusterkQueue,
}

impl<'a> ClusterkRunner<'a> {
    pub fn create(parallel: &ParallelConfig, registry: &'a TaskRegistry, log: WorkerLog) -> Self {
        let queue = ClusterkQueue {
            queue: parallel.queue.clone().unwrap_or_default(),
            cores_per_job: parallel.cores_per_job(),
            mem: parallel.mem().to_string(),
        };
        Self {
            parallel: parallel.clone(),
            registry,
            log,
            queue,
        }
    }
}

impl ParallelRunner for ClusterkRunner<'_> {
    fn run_task(&self, task: Task, items: Vec<TaskArgs>) -> SimpleResult<Vec<TaskValue>> {
        let wrapper = match self.parallel.wrapper.as_deref() {
            Some(x) => x,
            None => bail!("Clusterk execution requires a task wrapper"),
        };
        let mut wrapper_args = self.parallel.wrapper_args.clone();
        wrapper_args.extend(self.queue.to_args());

        let items = prepare_items(items, task.name(), self.parallel.cores_per_job());
        let mut output = Vec::new();
        for (index, args) in items.into_iter().enumerate() {
            let context = TaskContext {
                log: self.log.with_label(&format!("{}.{index}", task.name())),
            };
            output.extend(
                self.registry
                    .dispatch(task, Some(wrapper), &wrapper_args, &context, args)?,
            );
        }
        Ok(output)
    }

    fn parallel(&self) -> &ParallelConfig {
        &self.parallel
    }
}
