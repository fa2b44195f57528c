//! Resource-aware parallel execution of pipeline phases
//!
//! Work is sized against discovered node resources (`resources`, `system`), dispatched to one of
//! several execution backends (`multi`, `cluster`, `clusterk`) through the phase orchestrator
//! (`prun`), and split/recombined by region in `split`.
//!

pub mod cluster;
pub mod clusterk;
pub mod multi;
pub mod prun;
pub mod resources;
pub mod split;
pub mod system;
pub mod tasks;
pub mod wire;
pub mod worker_log;

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use simple_error::SimpleResult;
use strum::{Display, EnumString};

use self::system::MachineInfo;
use self::tasks::{LocalTaskFn, TaskContext};
use crate::config::RunConfig;
use crate::region::Region;
use crate::work_item::WorkItem;

#[derive(Clone, Copy, Debug, Default, Display, EnumString, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ParallelType {
    /// Worker pool on the local machine
    #[default]
    Local,

    /// Worker engines submitted through a cluster scheduler
    Cluster,

    /// Remote VM queue, always run through a wrapper
    Clusterk,
}

#[derive(Clone, Copy, Debug, Display, EnumString, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Scheduler {
    Slurm,
    Torque,
    Pbspro,
    Sge,
    Lsf,
}

/// Queue name which requests that a cluster configuration runs on the local machine
pub const LOCAL_RUN_QUEUE: &str = "localrun";

/// Job layout computed for one phase
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct JobSizing {
    pub cores_per_job: usize,
    pub num_jobs: usize,

    /// Memory reserved per job in Gb, formatted to one decimal
    pub mem: String,

    /// Fraction of the requested cores per job retained after memory scaling
    pub mem_pct: f64,
}

/// A scheduling request for one phase
///
/// Sizing is never written into a caller's copy: `resources::calculate` returns a new
/// configuration with `sizing` filled in.
///
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ParallelConfig {
    #[serde(rename = "type")]
    pub parallel_type: ParallelType,

    /// Total cores available to the phase
    pub cores: usize,

    pub scheduler: Option<Scheduler>,
    pub queue: Option<String>,

    /// Minutes to wait for cluster engines to start
    pub timeout: u64,

    /// Number of times a failed engine launch is resubmitted
    pub retries: u32,

    /// Extra scheduler resource requests, e.g. 'mincores=8'
    pub resources: Vec<String>,

    pub tag: Option<String>,
    pub run_local: bool,

    /// Logical program names used by the phase, such as 'aligner' or 'samtools'
    pub progs: Vec<String>,

    /// Minimum total memory in Gb per job, by program
    pub ensure_mem: BTreeMap<String, f64>,

    /// Name of a registered wrapper all tasks are executed through
    pub wrapper: Option<String>,
    pub wrapper_args: Vec<String>,

    pub sizing: Option<JobSizing>,

    /// Set when the phase runs locally because its checkpoint was already passed
    pub checkpointed: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            parallel_type: ParallelType::default(),
            cores: 1,
            scheduler: None,
            queue: None,
            timeout: 15,
            retries: 0,
            resources: Vec::new(),
            tag: None,
            run_local: false,
            progs: Vec::new(),
            ensure_mem: BTreeMap::new(),
            wrapper: None,
            wrapper_args: Vec::new(),
            sizing: None,
            checkpointed: false,
        }
    }
}

impl ParallelConfig {
    pub fn new(parallel_type: ParallelType, cores: usize) -> Self {
        Self {
            parallel_type,
            cores,
            ..Default::default()
        }
    }

    /// True if this configuration dispatches to cluster engines rather than running locally
    pub fn is_distributed(&self) -> bool {
        self.parallel_type == ParallelType::Cluster
            && !self.run_local
            && self.queue.as_deref() != Some(LOCAL_RUN_QUEUE)
    }

    pub fn cores_per_job(&self) -> usize {
        self.sizing.as_ref().map(|x| x.cores_per_job).unwrap_or(1)
    }

    pub fn num_jobs(&self) -> usize {
        self.sizing.as_ref().map(|x| x.num_jobs).unwrap_or(1)
    }

    pub fn mem(&self) -> &str {
        self.sizing.as_ref().map(|x| x.mem.as_str()).unwrap_or("1.0")
    }
}

/// Working directories for a pipeline run
#[derive(Clone, Debug)]
pub struct Dirs {
    pub work: Utf8PathBuf,
}

impl Dirs {
    pub fn new(work: &Utf8Path) -> Self {
        Self {
            work: work.to_path_buf(),
        }
    }
}

/// A task argument or result value
///
/// Every dispatched task receives a list of values and returns a list of values. Values cross
/// process boundaries for the cluster backends, so they must remain serializable.
///
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub enum TaskValue {
    Item(WorkItem),
    Group(Vec<WorkItem>),
    Region(Region),
    Path(Utf8PathBuf),
    Paths(Vec<Utf8PathBuf>),
    Config(RunConfig),
    Text(String),
    Machine(MachineInfo),
    List(Vec<TaskValue>),
}

impl TaskValue {
    /// Work items held directly by this value
    pub fn items_mut(&mut self) -> Vec<&mut WorkItem> {
        match self {
            Self::Item(x) => vec![x],
            Self::Group(x) => x.iter_mut().collect(),
            _ => Vec::new(),
        }
    }

    /// Work items held directly by this value, with groups flattened into their members
    pub fn into_items(self) -> Vec<WorkItem> {
        match self {
            Self::Item(x) => vec![x],
            Self::Group(x) => x,
            _ => Vec::new(),
        }
    }

    pub fn first_item(&self) -> Option<&WorkItem> {
        match self {
            Self::Item(x) => Some(x),
            Self::Group(x) => x.first(),
            _ => None,
        }
    }
}

pub type TaskArgs = Vec<TaskValue>;

/// First work item found in a task argument list
pub fn first_item_in_args(args: &[TaskValue]) -> Option<&WorkItem> {
    args.iter().find_map(|x| x.first_item())
}

/// Either a task looked up by name in the task registry, or a function run directly
#[derive(Clone, Copy)]
pub enum Task<'a> {
    Named(&'a str),
    Local(&'a str, &'a LocalTaskFn),
}

impl Task<'_> {
    pub fn name(&self) -> &str {
        match self {
            Self::Named(x) => x,
            Self::Local(x, _) => x,
        }
    }
}

/// Callable used by pipeline code to run a named task over a list of argument lists
///
/// Calls block until every item has completed. Results are returned in input order, with each
/// item's result list concatenated.
///
pub trait ParallelRunner {
    fn run_task(&self, task: Task, items: Vec<TaskArgs>) -> SimpleResult<Vec<TaskValue>>;

    /// The sized parallel configuration this runner dispatches with
    fn parallel(&self) -> &ParallelConfig;

    fn run_parallel(&self, task_name: &str, items: Vec<TaskArgs>) -> SimpleResult<Vec<TaskValue>> {
        self.run_task(Task::Named(task_name), items)
    }
}

/// Set the core count each dispatched work item will run with
pub fn add_cores_to_args(args: &mut TaskArgs, cores_per_job: usize) {
    for value in args.iter_mut() {
        for item in value.items_mut() {
            item.config.algorithm.num_cores = Some(cores_per_job);
        }
    }
}

/// Tag work items with a provenance entity derived from their parent, so nested parallel
/// calls remain traceable to the top-level invocation
pub fn track_parallel(items: &mut [TaskArgs], task_name: &str) {
    for (index, args) in items.iter_mut().enumerate() {
        if let Some(value) = args.iter_mut().find(|x| x.first_item().is_some()) {
            for item in value.items_mut() {
                if let Some(provenance) = item.provenance.as_mut() {
                    provenance.entity = format!("{}.{task_name}.{index}", provenance.entity);
                }
            }
        }
    }
}

/// Shared dispatch preparation for all backends
///
/// Drops empty argument lists, tags provenance and sets per-job cores.
///
fn prepare_items(items: Vec<TaskArgs>, task_name: &str, cores_per_job: usize) -> Vec<TaskArgs> {
    let mut items = items.into_iter().filter(|x| !x.is_empty()).collect::<Vec<_>>();
    track_parallel(&mut items, task_name);
    for args in items.iter_mut() {
        add_cores_to_args(args, cores_per_job);
    }
    items
}

/// Run a task over one argument list in the current thread, through the configured wrapper
fn run_task_inline(
    registry: &tasks::TaskRegistry,
    task: Task,
    parallel: &ParallelConfig,
    context: &TaskContext,
    args: TaskArgs,
) -> SimpleResult<Vec<TaskValue>> {
    registry.dispatch(
        task,
        parallel.wrapper.as_deref(),
        &parallel.wrapper_args,
        context,
        args,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distributed_check() {
        let mut parallel = ParallelConfig::new(ParallelType::Cluster, 8);
        parallel.queue = Some("long".to_string());
        assert!(parallel.is_distributed());

        parallel.queue = Some(LOCAL_RUN_QUEUE.to_string());
        assert!(!parallel.is_distributed());

        let parallel = ParallelConfig::new(ParallelType::Local, 8);
        assert!(!parallel.is_distributed());
    }

    #[test]
    fn test_parallel_config_yaml() {
        let parallel: ParallelConfig =
            serde_yaml::from_str("type: cluster\ncores: 32\nscheduler: slurm\nqueue: general")
                .unwrap();
        assert_eq!(parallel.parallel_type, ParallelType::Cluster);
        assert_eq!(parallel.scheduler, Some(Scheduler::Slurm));
        assert!(parallel.sizing.is_none());
        assert_eq!(parallel.timeout, 15);
        assert_eq!("SGE".parse::<Scheduler>().unwrap(), Scheduler::Sge);
    }

    #[test]
    fn test_prepare_items() {
        let item = WorkItem::new("s1", RunConfig::default());
        let items = vec![
            vec![TaskValue::Item(item.clone()), TaskValue::Text("a".to_string())],
            Vec::new(),
            vec![TaskValue::Group(vec![item.clone(), item])],
        ];
        let items = prepare_items(items, "process", 4);
        assert_eq!(items.len(), 2);

        let first = first_item_in_args(&items[0]).unwrap();
        assert_eq!(first.provenance.as_ref().unwrap().entity, "s1.process.0");
        assert_eq!(first.config.algorithm.num_cores, Some(4));

        match &items[1][0] {
            TaskValue::Group(x) => {
                assert!(x.iter().all(|x| x.provenance.as_ref().unwrap().entity == "s1.process.1"));
            }
            _ => panic!("unexpected task value"),
        }
    }
}
