//! Run tasks on cluster engines submitted through a batch scheduler
//!
//! Each dispatched argument list is written to a request file in the phase exchange directory,
//! and a single-task engine (this program's hidden `engine` subcommand) is submitted through the
//! scheduler's blocking submit command to process it and write a response file. At most
//! `num_jobs` engines are in flight at once, each requesting `cores_per_job` cores and the job
//! memory.
//!

use std::collections::{BTreeMap, HashMap, HashSet};
use std::process::{Child, Command};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::channel;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail, try_with};

use super::multi::run_multicore;
use super::tasks::{TaskContext, TaskRegistry};
use super::worker_log::{LogSink, WorkerLog};
use super::{
    Dirs, ParallelConfig, ParallelRunner, Scheduler, Task, TaskArgs, TaskValue, prepare_items, wire,
};
use crate::config::{Resources, RunConfig};
use crate::os_utils::create_dir_all;

/// Message read by an engine
#[derive(Debug, Deserialize, Serialize)]
pub enum EngineRequest {
    /// Startup check, the engine only writes an empty response
    Ping,

    Run {
        task: String,
        wrapper: Option<String>,
        wrapper_args: Vec<String>,
        args: TaskArgs,
    },
}

/// Message written by an engine
#[derive(Debug, Deserialize, Serialize)]
pub struct EngineResponse {
    pub result: Result<Vec<TaskValue>, String>,
}

/// One engine submission
#[derive(Clone, Debug)]
pub struct EngineJob {
    pub name: String,
    pub request: Utf8PathBuf,
    pub response: Utf8PathBuf,
    pub compressed: bool,
    pub cores: usize,

    /// Memory per job in Gb
    pub mem: f64,
}

impl EngineJob {
    /// Arguments for the engine subcommand of this program
    pub fn engine_args(&self) -> Vec<String> {
        let mut args = vec![
            "engine".to_string(),
            "--request".to_string(),
            self.request.to_string(),
            "--response".to_string(),
            self.response.to_string(),
        ];
        if self.compressed {
            args.push("--compressed".to_string());
        }
        args
    }

    fn mem_mb(&self) -> u64 {
        (self.mem * 1024.0).ceil() as u64
    }
}

/// Starts an engine for a job and blocks until it exits
///
/// Returns true if the launch completed successfully. The engine's own task result is only found
/// in the job's response file.
///
pub trait EngineLauncher: Send + Sync {
    fn launch(&self, job: &EngineJob) -> SimpleResult<bool>;

    /// Stop an in-progress launch of `job`, so that its `launch` call returns
    fn cancel(&self, job: &EngineJob) -> SimpleResult<()>;
}

/// Interval between checks on a running scheduler submit command
const SUBMIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Launches engines through a scheduler's blocking submit command
pub struct SchedulerLauncher {
    scheduler: Scheduler,
    queue: String,
    resources: Vec<String>,
    engine_exe: Utf8PathBuf,
    work_dir: Utf8PathBuf,

    submissions: Mutex<Submissions>,
}

/// Submit commands of in-progress launches, keyed by job request path
#[derive(Default)]
struct Submissions {
    running: HashMap<Utf8PathBuf, Child>,

    /// Jobs cancelled before their submit command started
    cancelled: HashSet<Utf8PathBuf>,
}

impl SchedulerLauncher {
    pub fn new(
        scheduler: Scheduler,
        queue: &str,
        resources: &[String],
        work_dir: &Utf8Path,
    ) -> SimpleResult<Self> {
        let exe = try_with!(std::env::current_exe(), "Can't find path of current executable");
        let engine_exe = match Utf8PathBuf::from_path_buf(exe) {
            Ok(x) => x,
            Err(x) => bail!("Executable path is not valid UTF-8: '{}'", x.display()),
        };
        Ok(Self {
            scheduler,
            queue: queue.to_string(),
            resources: resources.to_vec(),
            engine_exe,
            work_dir: work_dir.to_path_buf(),
            submissions: Mutex::new(Submissions::default()),
        })
    }

    fn engine_command(&self, job: &EngineJob) -> Vec<String> {
        std::iter::once(self.engine_exe.to_string())
            .chain(job.engine_args())
            .collect()
    }
}

/// Split scheduler resources into the named settings handled here and passthrough options
fn resource_settings(resources: &[String]) -> (BTreeMap<&str, &str>, Vec<&str>) {
    let mut named = BTreeMap::new();
    let mut passthrough = Vec::new();
    for resource in resources {
        match resource.split_once('=') {
            Some((key @ ("mincores" | "pename"), value)) => {
                named.insert(key, value);
            }
            _ => passthrough.push(resource.as_str()),
        }
    }
    (named, passthrough)
}

/// Full argument list for a blocking scheduler submission of `engine_command`
///
/// Torque and PBSPro submit `script`, which must run `engine_command`.
///
pub fn submit_command(
    scheduler: Scheduler,
    queue: &str,
    resources: &[String],
    job: &EngineJob,
    engine_command: &[String],
    script: &Utf8Path,
) -> Vec<String> {
    let (named, passthrough) = resource_settings(resources);
    let cores = job.cores.to_string();
    let mem_mb = job.mem_mb();
    let args: Vec<String> = match scheduler {
        Scheduler::Slurm => {
            let mut args = vec![
                "srun".to_string(),
                "--quiet".to_string(),
                "--nodes=1".to_string(),
                "--ntasks=1".to_string(),
                format!("--partition={queue}"),
                format!("--cpus-per-task={cores}"),
                format!("--mem={mem_mb}M"),
                format!("--job-name={}", job.name),
            ];
            if let Some(mincores) = named.get("mincores") {
                args.push(format!("--mincpus={mincores}"));
            }
            args.extend(passthrough.iter().map(|x| format!("--{x}")));
            args
        }
        Scheduler::Sge => {
            let pename = named.get("pename").copied().unwrap_or("smp");
            let mut args = [
                "qsub", "-sync", "y", "-b", "y", "-cwd", "-V", "-j", "y", "-o", "/dev/null", "-q",
                queue, "-N", job.name.as_str(), "-pe", pename, cores.as_str(),
            ]
            .map(String::from)
            .to_vec();
            for resource in passthrough {
                args.extend(["-l".to_string(), resource.to_string()]);
            }
            args
        }
        Scheduler::Lsf => {
            let mut args = ["bsub", "-K", "-q", queue, "-J", job.name.as_str(), "-n", cores.as_str()]
                .map(String::from)
                .to_vec();
            args.push("-R".to_string());
            args.push(format!("span[hosts=1] rusage[mem={mem_mb}]"));
            args.extend(["-o".to_string(), "/dev/null".to_string()]);
            for resource in passthrough {
                args.extend(["-R".to_string(), resource.to_string()]);
            }
            args
        }
        Scheduler::Torque | Scheduler::Pbspro => {
            let mut args = [
                "qsub", "-W", "block=true", "-q", queue, "-N", job.name.as_str(), "-j", "oe", "-o",
                "/dev/null",
            ]
            .map(String::from)
            .to_vec();
            if scheduler == Scheduler::Torque {
                args.push("-l".to_string());
                args.push(format!("nodes=1:ppn={cores}"));
                args.push("-l".to_string());
                args.push(format!("mem={mem_mb}mb"));
            } else {
                args.push("-l".to_string());
                args.push(format!("select=1:ncpus={cores}:mem={mem_mb}mb"));
            }
            for resource in passthrough {
                args.extend(["-l".to_string(), resource.to_string()]);
            }
            args.push(script.to_string());
            return args;
        }
    };
    args.into_iter().chain(engine_command.iter().cloned()).collect()
}

impl EngineLauncher for SchedulerLauncher {
    fn launch(&self, job: &EngineJob) -> SimpleResult<bool> {
        let engine_command = self.engine_command(job);
        let script = job.request.with_extension("sh");
        if matches!(self.scheduler, Scheduler::Torque | Scheduler::Pbspro) {
            let content = format!(
                "#!/bin/sh\ncd '{}'\nexec {}\n",
                self.work_dir,
                engine_command.join(" ")
            );
            try_with!(
                std::fs::write(&script, content),
                "Unable to write engine submission script: '{script}'"
            );
        }
        let cmd = submit_command(
            self.scheduler,
            &self.queue,
            &self.resources,
            job,
            &engine_command,
            &script,
        );
        debug!("Submitting engine: {}", cmd.join(" "));
        {
            let mut submissions = self.submissions.lock().unwrap();
            if submissions.cancelled.remove(&job.request) {
                debug!("Engine submission cancelled: '{}'", job.request);
                return Ok(false);
            }
            let child = try_with!(
                Command::new(&cmd[0]).args(&cmd[1..]).current_dir(&self.work_dir).spawn(),
                "Unable to run scheduler submit command '{}'",
                cmd[0]
            );
            submissions.running.insert(job.request.clone(), child);
        }

        loop {
            {
                let mut submissions = self.submissions.lock().unwrap();
                let child = match submissions.running.get_mut(&job.request) {
                    Some(x) => x,
                    None => {
                        debug!("Engine submission cancelled: '{}'", job.request);
                        return Ok(false);
                    }
                };
                let status = try_with!(
                    child.try_wait(),
                    "Unable to check scheduler submit command '{}'",
                    cmd[0]
                );
                if let Some(status) = status {
                    submissions.running.remove(&job.request);
                    return Ok(status.success());
                }
            }
            std::thread::sleep(SUBMIT_POLL_INTERVAL);
        }
    }

    fn cancel(&self, job: &EngineJob) -> SimpleResult<()> {
        let mut submissions = self.submissions.lock().unwrap();
        match submissions.running.remove(&job.request) {
            Some(mut child) => {
                warn!("Cancelling engine submission: '{}'", job.request);
                try_with!(
                    child.kill(),
                    "Unable to stop scheduler submit command for '{}'",
                    job.request
                );
                let _ = child.wait();
            }
            None => {
                submissions.cancelled.insert(job.request.clone());
            }
        }
        Ok(())
    }
}

/// Reduce cores on larger machines to leave room for the submitting process and scheduler
/// overhead
pub fn per_machine_target_cores(cores: usize, num_jobs: usize) -> usize {
    if cores >= 32 && num_jobs == 1 {
        cores - 2
    } else if cores >= 16 && (num_jobs == 1 || num_jobs == 2) {
        cores - 1
    } else {
        cores
    }
}

/// The most frequently declared program core count, the first declared count breaking ties
pub fn get_common_cores(resources: &Resources) -> Option<usize> {
    let mut counts: Vec<(usize, usize)> = Vec::new();
    for cores in resources.programs.values().filter_map(|x| x.cores) {
        match counts.iter_mut().find(|x| x.0 == cores) {
            Some(x) => x.1 += 1,
            None => counts.push((cores, 1)),
        }
    }
    let max_count = counts.iter().map(|x| x.1).max()?;
    counts.iter().find(|x| x.1 == max_count).map(|x| x.0)
}

/// Minimum cores per machine to request so engines pack onto fewer machines
///
/// Returns None when the cluster configuration already sets `mincores`, or when single core
/// machines are expected.
///
pub fn get_mincores(
    parallel: &ParallelConfig,
    resources: &Resources,
    system_cores: Option<usize>,
) -> Option<usize> {
    if parallel.resources.iter().any(|x| x.starts_with("mincores=")) {
        return None;
    }
    let cores = match (get_common_cores(resources), system_cores) {
        (Some(a), Some(b)) => std::cmp::min(a, b),
        (a, b) => a.or(b)?,
    };
    if cores <= 1 {
        return None;
    }
    let mem_pct = parallel.sizing.as_ref().map(|x| x.mem_pct).unwrap_or(1.0);
    let adj_cores = std::cmp::max(1, (cores as f64 * mem_pct).floor() as usize);
    let total_job_cores = parallel.num_jobs() * parallel.cores_per_job();
    let cores = if cores > parallel.cores {
        parallel.cores
    } else if adj_cores > total_job_cores {
        total_job_cores
    } else {
        per_machine_target_cores(adj_cores, parallel.num_jobs())
    };
    Some(cores)
}

/// Wait up to `timeout` for a startup probe engine to respond
fn probe_engine(
    launcher: Arc<dyn EngineLauncher>,
    job: EngineJob,
    timeout: Duration,
) -> SimpleResult<()> {
    let (tx, rx) = channel();
    let handle = {
        let launcher = launcher.clone();
        let job = job.clone();
        std::thread::spawn(move || {
            let _ = tx.send(launcher.launch(&job));
        })
    };
    let launched = match rx.recv_timeout(timeout) {
        Ok(x) => x,
        Err(_) => {
            // The launch thread must finish before the exchange directory can be removed
            launcher.cancel(&job)?;
            let _ = handle.join();
            bail!(
                "Cluster engines did not start within {} minutes",
                timeout.as_secs_f64() / 60.0
            );
        }
    };
    let _ = handle.join();
    match launched {
        Ok(_) if job.response.exists() => Ok(()),
        Ok(_) => bail!("Cluster engine exited without responding to startup probe"),
        Err(e) => Err(e),
    }
}

pub struct ClusterRunner<'a> {
    parallel: ParallelConfig,
    registry: &'a TaskRegistry,
    log: WorkerLog,
    launcher: Arc<dyn EngineLauncher>,
    exchange_dir: Utf8PathBuf,
    config: RunConfig,
    compress: bool,
    call_counter: AtomicUsize,
}

impl<'a> ClusterRunner<'a> {
    /// Set up the phase exchange directory and scheduler launcher, then check an engine can start
    pub fn create(
        parallel: &ParallelConfig,
        dirs: &Dirs,
        config: &RunConfig,
        registry: &'a TaskRegistry,
        log: WorkerLog,
        phase_label: &str,
        system_cores: Option<usize>,
    ) -> SimpleResult<Self> {
        let (scheduler, queue) = match (parallel.scheduler, parallel.queue.as_deref()) {
            (Some(s), Some(q)) => (s, q),
            _ => bail!("Cluster execution requires both a scheduler and a queue"),
        };

        let mut parallel = parallel.clone();
        if let Some(mincores) = get_mincores(&parallel, &config.resources, system_cores) {
            parallel.resources.push(format!("mincores={mincores}"));
        }

        let launcher = SchedulerLauncher::new(scheduler, queue, &parallel.resources, &dirs.work)?;
        let runner = Self::with_launcher(
            parallel,
            dirs,
            config,
            registry,
            log,
            phase_label,
            Arc::new(launcher),
        )?;
        runner.probe(Duration::from_secs(runner.parallel.timeout * 60))?;
        Ok(runner)
    }

    pub fn with_launcher(
        parallel: ParallelConfig,
        dirs: &Dirs,
        config: &RunConfig,
        registry: &'a TaskRegistry,
        log: WorkerLog,
        phase_label: &str,
        launcher: Arc<dyn EngineLauncher>,
    ) -> SimpleResult<Self> {
        let exchange_dir = dirs.work.join("cluster").join(phase_label);
        if exchange_dir.exists() {
            try_with!(
                std::fs::remove_dir_all(&exchange_dir),
                "Unable to clear stale cluster exchange directory: '{exchange_dir}'"
            );
        }
        create_dir_all(&exchange_dir, "cluster exchange");
        info!(
            "Created cluster for {} jobs with {} cores and {}Gb each: '{exchange_dir}'",
            parallel.num_jobs(),
            parallel.cores_per_job(),
            parallel.mem()
        );
        Ok(Self {
            parallel,
            registry,
            log,
            launcher,
            exchange_dir,
            config: config.clone(),
            compress: config.algorithm.compress_msg,
            call_counter: AtomicUsize::new(0),
        })
    }

    fn job(&self, label: &str) -> EngineJob {
        EngineJob {
            name: self.parallel.tag.clone().unwrap_or(crate::globals::PROGRAM_NAME.to_string()),
            request: self.exchange_dir.join(format!("{label}.request")),
            response: self.exchange_dir.join(format!("{label}.response")),
            compressed: self.compress,
            cores: self.parallel.cores_per_job(),
            mem: self.parallel.mem().parse::<f64>().unwrap_or(1.0),
        }
    }

    fn write_request(&self, job: &EngineJob, request: &EngineRequest) -> SimpleResult<()> {
        let bytes = wire::encode(request, self.compress)?;
        try_with!(
            std::fs::write(&job.request, bytes),
            "Unable to write engine request: '{}'",
            job.request
        );
        Ok(())
    }

    pub fn probe(&self, timeout: Duration) -> SimpleResult<()> {
        let job = self.job("probe");
        self.write_request(&job, &EngineRequest::Ping)?;
        probe_engine(self.launcher.clone(), job, timeout)
    }

    /// Submit one engine, resubmitting failed launches up to the configured retry count
    ///
    /// A task which ran and returned an error is never resubmitted.
    ///
    fn run_job(&self, job: &EngineJob) -> SimpleResult<Vec<TaskValue>> {
        let attempts = self.parallel.retries + 1;
        for attempt in 1..=attempts {
            let launched = self.launcher.launch(job);
            if job.response.exists() {
                let bytes = try_with!(
                    std::fs::read(&job.response),
                    "Unable to read engine response: '{}'",
                    job.response
                );
                let response: EngineResponse = wire::decode(&bytes, job.compressed)?;
                return response.result.map_err(simple_error::SimpleError::new);
            }
            match launched {
                Ok(_) => warn!(
                    "Engine for '{}' exited without a response (attempt {attempt} of {attempts})",
                    job.request
                ),
                Err(e) => warn!(
                    "Engine launch for '{}' failed (attempt {attempt} of {attempts}): {e}",
                    job.request
                ),
            }
        }
        bail!(
            "Engine for '{}' failed to run after {attempts} attempts",
            job.request
        )
    }
}

impl ParallelRunner for ClusterRunner<'_> {
    fn run_task(&self, task: Task, items: Vec<TaskArgs>) -> SimpleResult<Vec<TaskValue>> {
        let task_name = match task {
            Task::Named(x) => x,
            Task::Local(..) => {
                // Local functions only exist in this process
                return run_multicore(
                    self.registry,
                    &self.log,
                    task,
                    items,
                    &self.config,
                    Some(self.parallel.clone()),
                );
            }
        };
        if !self.registry.contains(task_name) {
            bail!("No task registered with name '{task_name}'");
        }

        let items = prepare_items(items, task_name, self.parallel.cores_per_job());
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let call_index = self.call_counter.fetch_add(1, Ordering::SeqCst);

        let mut jobs = Vec::new();
        for (index, args) in items.into_iter().enumerate() {
            let job = self.job(&format!("{task_name}-{call_index}-{index}"));
            let request = EngineRequest::Run {
                task: task_name.to_string(),
                wrapper: self.parallel.wrapper.clone(),
                wrapper_args: self.parallel.wrapper_args.clone(),
                args,
            };
            self.write_request(&job, &request)?;
            jobs.push(job);
        }

        let num_jobs = std::cmp::min(self.parallel.num_jobs(), jobs.len()).max(1);
        debug!(
            "Submitting task '{task_name}' on {} items to {num_jobs} engine slots",
            jobs.len()
        );
        let worker_pool = try_with!(
            rayon::ThreadPoolBuilder::new().num_threads(num_jobs).build(),
            "Unable to create engine submission pool"
        );

        let (tx, rx) = channel();
        worker_pool.scope(|scope| {
            for (index, job) in jobs.iter().enumerate() {
                let tx = tx.clone();
                scope.spawn(move |_| {
                    tx.send((index, self.run_job(job))).unwrap();
                });
            }
        });
        drop(tx);

        let mut results = rx.into_iter().collect::<Vec<_>>();
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

impl Drop for ClusterRunner<'_> {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.exchange_dir) {
            warn!(
                "Unable to remove cluster exchange directory '{}': {e}",
                self.exchange_dir
            );
        }
    }
}

/// Process one engine request, writing the task result to the response file
///
/// Task failures are reported in the response, an error is only returned if the request can't
/// be read or the response can't be written.
///
pub fn run_engine(
    registry: &TaskRegistry,
    request_path: &Utf8Path,
    response_path: &Utf8Path,
    compressed: bool,
) -> SimpleResult<()> {
    let bytes = try_with!(
        std::fs::read(request_path),
        "Unable to read engine request: '{request_path}'"
    );
    let request: EngineRequest = wire::decode(&bytes, compressed)?;

    let result = match request {
        EngineRequest::Ping => Ok(Vec::new()),
        EngineRequest::Run {
            task,
            wrapper,
            wrapper_args,
            args,
        } => {
            let sink = LogSink::new();
            let context = TaskContext {
                log: sink.worker_log(&task),
            };
            let result = registry
                .dispatch(
                    Task::Named(&task),
                    wrapper.as_deref(),
                    &wrapper_args,
                    &context,
                    args,
                )
                .map_err(|e| e.to_string());
            drop(context);
            sink.finish();
            result
        }
    };

    let bytes = wire::encode(&EngineResponse { result }, compressed)?;
    let tmp_path = response_path.with_extension("response.tmp");
    try_with!(
        std::fs::write(&tmp_path, bytes),
        "Unable to write engine response: '{tmp_path}'"
    );
    try_with!(
        std::fs::rename(&tmp_path, response_path),
        "Unable to move engine response into place: '{response_path}'"
    );
    Ok(())
}
