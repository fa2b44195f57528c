//! Job sizing from program resource requirements and node resource ceilings
//!
//! A phase declares the logical programs it runs. Their configured core and memory requirements
//! are combined with the discovered per-node ceilings to partition the phase's total cores into
//! job slots.
//!

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use log::debug;
use simple_error::{SimpleResult, bail};

use super::system::SystemInfo;
use super::{JobSizing, ParallelConfig};
use crate::config::{AlgorithmConfig, ProgramResources, RunConfig};
use crate::work_item::WorkItem;

/// Memory reserved on each job for everything besides the configured programs, in Gb
pub const SYSTEM_MEMORY_OVERHEAD_GB: f64 = 0.25;

/// Memory per core assumed when no program declares a requirement, in Gb
const DEFAULT_MEMORY_PER_CORE_GB: f64 = 1.0;

/// Convert memory strings like '4G' or '500M' to Gb
pub fn str_memory_to_gb(memory: &str) -> SimpleResult<f64> {
    let memory = memory.trim();
    let unit = match memory.chars().last() {
        Some(x) => x,
        None => bail!("Empty memory specification"),
    };
    let value = &memory[..memory.len() - unit.len_utf8()];
    let unit = unit.to_ascii_lowercase();
    let value = match value.parse::<f64>() {
        Ok(x) => x,
        Err(_) => bail!("Unexpected memory specification: '{memory}'"),
    };
    match unit {
        'g' => Ok(value),
        'm' => Ok(value / 1024.0),
        _ => bail!("Unexpected units in memory specification: '{memory}'"),
    }
}

/// Format memory in Gb as reported in job sizing, rounding half away from zero
pub fn format_gb(memory: f64) -> String {
    format!("{:.1}", (memory * 10.0).round() / 10.0)
}

/// Resolve abstract program names to the concrete programs configured for the given items
///
/// 'aligner', 'variantcaller', 'svcaller' and 'peakcaller' expand to the tools configured in
/// each item's algorithm section, 'gatk-vqsr' is only kept when VQSR will actually run. Any
/// other name is used as-is.
///
fn get_resource_programs(progs: &[String], algs: &[&AlgorithmConfig]) -> Vec<String> {
    let mut out = BTreeSet::new();
    for prog in progs {
        match prog.as_str() {
            "aligner" | "variantcaller" | "svcaller" | "peakcaller" => {
                for alg in algs {
                    out.extend(alg.tool_names(prog).into_iter().map(|x| x.to_string()));
                }
            }
            "gatk-vqsr" => {
                if algs.iter().any(|x| x.use_vqsr()) {
                    out.insert(prog.clone());
                }
            }
            _ => {
                out.insert(prog.clone());
            }
        }
    }
    out.into_iter().collect()
}

/// Get expected memory usage for a program in Gb per core
///
/// An explicit `memory` entry takes precedence over a JVM `-Xmx` setting. Single-core programs
/// run as part of a multicore job have their memory spread across the job's cores.
///
fn get_prog_memory(resources: &ProgramResources, cores_per_job: usize) -> SimpleResult<Option<f64>> {
    let mut memory = None;
    for jvm_opt in resources.jvm_opts.iter() {
        if let Some(x) = jvm_opt.strip_prefix("-Xmx") {
            memory = Some(str_memory_to_gb(x)?);
        }
    }
    if let Some(x) = &resources.memory {
        memory = Some(str_memory_to_gb(x)?);
    }
    if let (Some(x), Some(1)) = (memory, resources.cores) {
        if cores_per_job > 1 {
            memory = Some(x / cores_per_job as f64);
        }
    }
    Ok(memory)
}

/// Raise memory per core so that each job meets any program's total memory floor
fn ensure_min_resources(
    progs: &[String],
    cores_per_job: usize,
    memory_per_core: f64,
    min_memory: &BTreeMap<String, f64>,
) -> f64 {
    let mut memory_per_core = memory_per_core;
    for prog in progs {
        if let Some(&min_mem) = min_memory.get(prog) {
            if cores_per_job as f64 * memory_per_core < min_mem {
                memory_per_core = min_mem / cores_per_job as f64;
            }
        }
    }
    memory_per_core
}

/// For single-core jobs, reduce the job count when nodes have less memory per core than a job
/// requires
///
/// Returns the job count and the fraction of jobs retained.
///
fn scale_jobs_to_memory(jobs: usize, mem_per_core: f64, sysinfo: &SystemInfo) -> (usize, f64) {
    let (sys_cores, sys_mem) = match (sysinfo.cores, sysinfo.memory) {
        (Some(c), Some(m)) if c > 0 => (c, m),
        _ => return (jobs, 1.0),
    };
    let sys_mem_per_core = sys_mem / sys_cores as f64;
    if sys_mem_per_core < mem_per_core {
        let pct = sys_mem_per_core / mem_per_core;
        let target_jobs = (jobs as f64 * pct).floor() as usize;
        (std::cmp::max(target_jobs, 1), pct)
    } else {
        (jobs, 1.0)
    }
}

/// For multicore jobs, reduce cores per job until the job's memory fits on one node
///
/// Returns the scaled cores per job, memory per job in Gb, and the fraction of cores retained.
///
fn scale_cores_to_memory(
    cores: usize,
    mem_per_core: f64,
    sysinfo: &SystemInfo,
    system_memory: f64,
) -> (usize, f64, f64) {
    let total_mem = cores as f64 * mem_per_core + system_memory;
    let (sys_cores, sys_mem) = match (sysinfo.cores, sysinfo.memory) {
        (Some(c), Some(m)) => (c, m),
        _ => return (cores, total_mem, 1.0),
    };

    let available_mem = f64::max(sys_mem - system_memory, mem_per_core + system_memory);
    let total_mem = f64::min(total_mem, available_mem);
    let cores = std::cmp::max(std::cmp::min(cores, sys_cores), 1);
    let mem_cores = (total_mem / mem_per_core).floor() as usize;
    let out_cores = mem_cores.clamp(1, cores);
    let mem_pct = out_cores as f64 / cores as f64;
    (out_cores, total_mem, mem_pct)
}

fn get_resources<'a>(prog: &str, config: &'a RunConfig) -> Option<&'a ProgramResources> {
    config.resources.get(prog)
}

/// Determine cores and jobs to use for a phase based on the programs it runs
///
/// # Arguments
/// * `multiplier` - expected number of split tasks per item, so that the job count can be sized
///   before splitting happens
/// * `max_multicore` - optional limit on cores per job
///
/// Returns a copy of `parallel` with `sizing` filled in.
///
pub fn calculate(
    parallel: &ParallelConfig,
    items: &[WorkItem],
    sysinfo: &SystemInfo,
    config: &RunConfig,
    multiplier: usize,
    max_multicore: Option<usize>,
) -> SimpleResult<ParallelConfig> {
    if items.is_empty() {
        bail!("Finding job resources but no items to process");
    }
    if parallel.cores == 0 {
        bail!("Parallel configuration requires at least one core");
    }
    let multiplier = std::cmp::max(multiplier, 1);

    let algs = items.iter().map(|x| &x.config.algorithm).collect::<Vec<_>>();
    let progs = get_resource_programs(&parallel.progs, &algs);

    let mut all_cores = progs
        .iter()
        .map(|x| get_resources(x, config).and_then(|r| r.cores).unwrap_or(1))
        .collect::<Vec<_>>();
    if all_cores.is_empty() {
        all_cores.push(1);
    }
    let mut cores_per_job = all_cores.iter().copied().max().unwrap_or(1);
    if let Some(max_multicore) = max_multicore {
        cores_per_job = std::cmp::min(cores_per_job, std::cmp::max(max_multicore, 1));
    }
    if let Some(sys_cores) = sysinfo.cores {
        cores_per_job = std::cmp::min(cores_per_job, std::cmp::max(sys_cores, 1));
    }
    cores_per_job = std::cmp::max(cores_per_job, 1);

    let total = parallel.cores;
    let mut num_jobs = if total > cores_per_job {
        total / cores_per_job
    } else {
        cores_per_job = total;
        1
    };

    let mut all_memory = Vec::new();
    for prog in progs.iter() {
        if let Some(resources) = get_resources(prog, config) {
            if let Some(memory) = get_prog_memory(resources, cores_per_job)? {
                all_memory.push(memory);
            }
        }
    }
    if all_memory.is_empty() {
        all_memory.push(DEFAULT_MEMORY_PER_CORE_GB);
    }
    let memory_per_core = all_memory.iter().copied().fold(f64::MIN, f64::max);

    debug!(
        "Resource requests: {}; memory: {}; cores: {}",
        progs.join(", "),
        all_memory.iter().map(|x| format!("{x:.2}")).join(", "),
        all_cores.iter().join(", ")
    );

    let memory_per_core =
        ensure_min_resources(&progs, cores_per_job, memory_per_core, &parallel.ensure_mem);

    let (memory_per_job, mem_pct) = if cores_per_job == 1 {
        let (jobs, mem_pct) = scale_jobs_to_memory(num_jobs, memory_per_core, sysinfo);
        num_jobs = std::cmp::min(jobs, total);
        (memory_per_core + SYSTEM_MEMORY_OVERHEAD_GB, mem_pct)
    } else {
        let (cores, memory_per_job, mem_pct) = scale_cores_to_memory(
            cores_per_job,
            memory_per_core,
            sysinfo,
            SYSTEM_MEMORY_OVERHEAD_GB,
        );
        cores_per_job = cores;
        (memory_per_job, mem_pct)
    };

    // Don't create more job slots than there is work to fill them
    num_jobs = std::cmp::max(std::cmp::min(num_jobs, items.len() * multiplier), 1);

    let mem = format_gb(memory_per_job);
    debug!(
        "Configuring {num_jobs} jobs to run, using {cores_per_job} cores each with {mem}g of memory reserved for each job"
    );

    let mut parallel = parallel.clone();
    parallel.sizing = Some(JobSizing {
        cores_per_job,
        num_jobs,
        mem,
        mem_pct,
    });
    Ok(parallel)
}
