use clap::Args;
use simple_error::{SimpleResult, bail};

use crate::distributed::tasks::TaskRegistry;
use crate::distributed::{ParallelConfig, ParallelType, Scheduler};

/// Execution backend settings shared by all commands which run parallel phases
#[derive(Args, Clone)]
pub struct ParallelSettings {
    /// Execution backend for all parallel phases
    #[arg(long = "parallel", value_name = "TYPE", default_value = "local")]
    pub parallel_type: ParallelType,

    /// Cluster scheduler (slurm, torque, pbspro, sge, lsf)
    #[arg(long, short = 's')]
    pub scheduler: Option<Scheduler>,

    /// Scheduler queue to submit jobs to. Use 'localrun' to run cluster settings on this machine
    #[arg(long, short = 'q')]
    pub queue: Option<String>,

    /// Minutes to wait for the cluster to start up before failing
    #[arg(long, default_value_t = 15)]
    pub timeout: u64,

    /// Number of times to resubmit an engine launch which fails before reporting a result
    #[arg(long, default_value_t = 0)]
    pub retries: u32,

    /// Extra scheduler resource requests, e.g. 'mincores=8' or 'account=lab'
    ///
    /// This option may be given multiple times.
    ///
    #[arg(long = "resources", short = 'r', value_name = "RESOURCE")]
    pub resources: Vec<String>,

    /// Tag added to submitted job names
    #[arg(long)]
    pub tag: Option<String>,

    /// Program names used to look up core and memory requirements in the run configuration
    #[arg(long = "prog", value_name = "PROGRAM")]
    pub progs: Vec<String>,

    /// Minimum total memory per job in Gb for a program, e.g. 'samtools=8'
    ///
    /// Jobs of phases running the program are sized to at least this much memory. This option may
    /// be given multiple times.
    ///
    #[arg(long = "ensure-mem", value_name = "PROGRAM=GB", value_parser = parse_ensure_mem)]
    pub ensure_mem: Vec<(String, f64)>,

    /// Run every task through this registered wrapper, required for the clusterk backend
    #[arg(long)]
    pub wrapper: Option<String>,

    /// Argument passed to the task wrapper, may be given multiple times
    #[arg(long = "wrapper-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub wrapper_args: Vec<String>,
}

impl ParallelSettings {
    pub fn to_parallel_config(&self, cores: usize) -> ParallelConfig {
        let mut parallel = ParallelConfig::new(self.parallel_type, cores);
        parallel.scheduler = self.scheduler;
        parallel.queue = self.queue.clone();
        parallel.timeout = self.timeout;
        parallel.retries = self.retries;
        parallel.resources = self.resources.clone();
        parallel.tag = self.tag.clone();
        parallel.progs = self.progs.clone();
        parallel.ensure_mem = self.ensure_mem.iter().cloned().collect();
        parallel.wrapper = self.wrapper.clone();
        parallel.wrapper_args = self.wrapper_args.clone();
        parallel
    }
}

fn parse_ensure_mem(value: &str) -> Result<(String, f64), String> {
    let (prog, mem) = match value.split_once('=') {
        Some(x) => x,
        None => return Err(format!("expected 'program=Gb' format: '{value}'")),
    };
    match mem.parse::<f64>() {
        Ok(x) if x.is_finite() && x > 0.0 && !prog.is_empty() => Ok((prog.to_string(), x)),
        _ => Err(format!("invalid program memory floor: '{value}'")),
    }
}

pub fn validate_parallel_settings(settings: &ParallelSettings) -> SimpleResult<()> {
    match settings.parallel_type {
        ParallelType::Cluster => {
            if settings.scheduler.is_none() {
                bail!("Must specify --scheduler for the cluster backend");
            }
            if settings.queue.is_none() {
                bail!("Must specify --queue for the cluster backend");
            }
        }
        ParallelType::Clusterk => {
            if settings.wrapper.is_none() {
                bail!("Must specify --wrapper for the clusterk backend");
            }
        }
        ParallelType::Local => {}
    }
    if let Some(wrapper) = settings.wrapper.as_deref() {
        if !TaskRegistry::standard().contains_wrapper(wrapper) {
            bail!("Unknown task wrapper: '{wrapper}'");
        }
    }
    if settings.timeout == 0 {
        bail!("--timeout argument must be greater than 0");
    }
    for resource in settings.resources.iter() {
        if !resource.contains('=') {
            bail!("Scheduler resource must be in 'name=value' format: '{resource}'");
        }
    }
    Ok(())
}
