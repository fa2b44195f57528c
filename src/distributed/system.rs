//! Discovery of per-node cores and memory
//!
//! Local runs query the current machine directly. Cluster runs read a cache file written once per
//! scheduler and queue, which is filled either by querying the scheduler's command-line tools or,
//! when that isn't possible, by running a probe task on a cluster engine.
//!

use std::fs::File;
use std::io::BufReader;
use std::process::Command;

use camino::Utf8PathBuf;
use log::{info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail, try_with};
use thiserror::Error;

use super::prun::{self, PhaseOptions, RunContext};
use super::{Dirs, ParallelConfig, Scheduler, TaskValue};
use crate::config::Resources;
use crate::os_utils::create_dir_all;
use crate::work_item::WorkItem;

/// Resources of one node, as stored in the cluster cache file
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MachineInfo {
    pub cores: usize,

    /// Memory in Gb
    pub memory: f64,

    pub name: String,
}

/// Resource ceilings for a single node, either of which may be unknown
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct SystemInfo {
    pub cores: Option<usize>,
    pub memory: Option<f64>,
    pub name: Option<String>,
}

impl From<MachineInfo> for SystemInfo {
    fn from(x: MachineInfo) -> Self {
        Self {
            cores: Some(x.cores),
            memory: Some(x.memory),
            name: Some(x.name),
        }
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no scheduler and queue configured")]
    NoScheduler,

    #[error("resource query not implemented for scheduler '{0}'")]
    Unsupported(Scheduler),

    #[error("failed to run '{command}': {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },

    #[error("'{command}' exited with {status}")]
    Status { command: String, status: String },

    #[error("unexpected output from '{command}': {detail}")]
    Parse { command: String, detail: String },
}

fn parse_error(command: &str, detail: impl Into<String>) -> DiscoveryError {
    DiscoveryError::Parse {
        command: command.to_string(),
        detail: detail.into(),
    }
}

/// Resources of the machine running this process
pub fn machine_info() -> Vec<MachineInfo> {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    let memory = system.available_memory() as f64 / (1024.0 * 1024.0 * 1024.0);
    let name = match hostname::get() {
        Ok(x) => x.to_string_lossy().into_owned(),
        Err(_) => "<unknown hostname>".to_string(),
    };
    vec![MachineInfo {
        cores: num_cpus::get(),
        memory,
        name,
    }]
}

/// Reduce node descriptions to the single representative node
///
/// Only homogeneous clusters are supported, any difference between nodes is an error rather than
/// an implicit choice between them.
///
pub fn combine_machine_info(xs: Vec<MachineInfo>) -> SimpleResult<MachineInfo> {
    let mut xs = xs.into_iter();
    let first = match xs.next() {
        Some(x) => x,
        None => bail!("No machine information available to combine"),
    };
    for x in xs {
        if x != first {
            bail!(
                "Picking a resource specification from non-homogeneous cluster nodes is not supported: {first:?} vs {x:?}"
            );
        }
    }
    Ok(first)
}

pub fn get_cache_file(dirs: &Dirs, parallel: &ParallelConfig) -> Utf8PathBuf {
    let scheduler = parallel
        .scheduler
        .map(|x| x.to_string())
        .unwrap_or("none".to_string());
    let queue = parallel.queue.as_deref().unwrap_or("none");
    dirs.work
        .join("provenance")
        .join(format!("system-{scheduler}-{queue}.yaml"))
}

fn read_cache_file(filename: &camino::Utf8Path) -> SimpleResult<Vec<MachineInfo>> {
    let file = try_with!(
        File::open(filename),
        "Unable to open system information file: '{filename}'"
    );
    let minfos = try_with!(
        serde_yaml::from_reader(BufReader::new(file)),
        "Unable to parse system information file: '{filename}'"
    );
    Ok(minfos)
}

/// Retrieve node resources for a phase
///
/// An explicit machine entry in the resource configuration always wins. Cluster runs without a
/// cache file get no ceilings.
///
pub fn get_info(
    dirs: &Dirs,
    parallel: &ParallelConfig,
    resources: &Resources,
) -> SimpleResult<SystemInfo> {
    if let Some(machine) = &resources.machine {
        return Ok(SystemInfo {
            cores: Some(machine.cores),
            memory: Some(machine.memory),
            name: None,
        });
    }

    if parallel.is_distributed() {
        let cache_file = get_cache_file(dirs, parallel);
        if cache_file.exists() {
            Ok(combine_machine_info(read_cache_file(&cache_file)?)?.into())
        } else {
            Ok(SystemInfo::default())
        }
    } else {
        Ok(combine_machine_info(machine_info())?.into())
    }
}

fn run_query(program: &str, args: &[&str]) -> Result<String, DiscoveryError> {
    let command = std::iter::once(program).chain(args.iter().copied()).collect::<Vec<_>>().join(" ");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| DiscoveryError::Launch {
            command: command.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(DiscoveryError::Status {
            command,
            status: output.status.to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Memory held back from each node of a small cluster for the controller and driver, in Mb
const SLURM_SMALL_CLUSTER_RESERVE_MB: f64 = 6000.0;

/// Parse `sinfo -h -p <queue> --format '%c %m %D'`
///
/// Partitions with several node configurations report minimum values with a trailing '+'.
///
pub fn parse_slurm_info(out: &str) -> Result<Vec<MachineInfo>, DiscoveryError> {
    const COMMAND: &str = "sinfo";
    let line = match out.lines().find(|x| !x.trim().is_empty()) {
        Some(x) => x,
        None => return Err(parse_error(COMMAND, "empty output")),
    };
    let words = line.split_whitespace().collect::<Vec<_>>();
    if words.len() != 3 {
        return Err(parse_error(COMMAND, format!("expected 3 fields in '{line}'")));
    }
    let parse_field = |x: &str| x.trim_end_matches('+').parse::<f64>();
    let (cores, mem, nodes) = match (
        parse_field(words[0]),
        parse_field(words[1]),
        parse_field(words[2]),
    ) {
        (Ok(c), Ok(m), Ok(n)) => (c as usize, m, n as usize),
        _ => return Err(parse_error(COMMAND, format!("non-numeric fields in '{line}'"))),
    };
    let mem = if nodes < 3 && mem > SLURM_SMALL_CLUSTER_RESERVE_MB * 2.0 {
        mem - SLURM_SMALL_CLUSTER_RESERVE_MB
    } else {
        mem
    };
    Ok(vec![MachineInfo {
        cores,
        memory: mem / 1024.0,
        name: "slurm_machine".to_string(),
    }])
}

fn slurm_info(queue: &str) -> Result<Vec<MachineInfo>, DiscoveryError> {
    let out = run_query("sinfo", &["-h", "-p", queue, "--format", "%c %m %D"])?;
    parse_slurm_info(&out)
}

/// Short host names allowed to run jobs from the queue, parsed from `qstat -Qf <queue>`
pub fn parse_torque_queue_nodes(qstat_out: &str) -> Vec<String> {
    let mut hosts = Vec::new();
    let mut in_hosts = false;
    for line in qstat_out.lines() {
        let line = line.trim();
        if let Some(x) = line.strip_prefix("acl_hosts = ") {
            hosts.extend(x.split(',').map(|x| x.to_string()));
            in_hosts = true;
        } else if in_hosts {
            if line.contains(" = ") {
                break;
            }
            hosts.extend(line.split(',').map(|x| x.to_string()));
        }
    }
    hosts
        .iter()
        .map(|x| x.trim())
        .filter(|x| !x.is_empty())
        .map(|x| x.split('.').next().unwrap_or(x).to_string())
        .collect()
}

/// Find the first queue node in `pbsnodes` output and read its cores and physical memory
///
/// With no queue node list, the first node reported is used.
///
pub fn parse_torque_pbsnodes(
    pbs_out: &str,
    nodes: &[String],
) -> Result<Vec<MachineInfo>, DiscoveryError> {
    const COMMAND: &str = "pbsnodes";
    let mut name = None;
    let mut cores = None;
    for (i, line) in pbs_out.lines().enumerate() {
        let trimmed = line.trim();
        let is_node_header = !line.starts_with(char::is_whitespace) && !trimmed.is_empty();
        if is_node_header && ((i == 0 && nodes.is_empty()) || nodes.iter().any(|x| line.starts_with(x.as_str()))) {
            name = Some(trimmed.to_string());
        } else if name.is_some() {
            if let Some(x) = trimmed.strip_prefix("np = ") {
                cores = Some(x.trim().parse::<usize>().map_err(|_| {
                    parse_error(COMMAND, format!("unexpected core count '{x}'"))
                })?);
            } else if let Some(status) = trimmed.strip_prefix("status = ") {
                let physmem = match status.split(',').find_map(|x| x.strip_prefix("physmem=")) {
                    Some(x) => x,
                    None => return Err(parse_error(COMMAND, "no physmem in node status")),
                };
                let physmem_kb = physmem
                    .trim_end_matches("kb")
                    .parse::<f64>()
                    .map_err(|_| parse_error(COMMAND, format!("unexpected physmem '{physmem}'")))?;
                let cores = match cores {
                    Some(x) => x,
                    None => return Err(parse_error(COMMAND, "node status found before core count")),
                };
                return Ok(vec![MachineInfo {
                    cores,
                    memory: physmem_kb / 1048576.0,
                    name: name.unwrap_or_default(),
                }]);
            }
        }
    }
    Err(parse_error(COMMAND, "no matching node with status found"))
}

fn torque_info(queue: &str) -> Result<Vec<MachineInfo>, DiscoveryError> {
    let nodes = parse_torque_queue_nodes(&run_query("qstat", &["-Qf", queue])?);
    parse_torque_pbsnodes(&run_query("pbsnodes", &[])?, &nodes)
}

/// Total slots by host from `qstat -f -xml`, in reported order
fn parse_sge_slots(xml: &str) -> Result<Vec<(String, usize)>, DiscoveryError> {
    const COMMAND: &str = "qstat";
    let queue_list_re = Regex::new(r"(?s)<Queue-List>(.*?)</Queue-List>").unwrap();
    let name_re = Regex::new(r"<name>([^<]*)</name>").unwrap();
    let slots_re = Regex::new(r"<slots_total>\s*(\d+)\s*</slots_total>").unwrap();

    let mut hosts: Vec<(String, usize)> = Vec::new();
    for cap in queue_list_re.captures_iter(xml) {
        let block = &cap[1];
        let (name, slots) = match (name_re.captures(block), slots_re.captures(block)) {
            (Some(n), Some(s)) => (n[1].to_string(), s[1].parse::<usize>().unwrap_or(0)),
            _ => return Err(parse_error(COMMAND, "queue entry without name or slots_total")),
        };
        let host = name.rsplit('@').next().unwrap_or(&name).to_string();
        match hosts.iter_mut().find(|(x, _)| *x == host) {
            Some(entry) => entry.1 = slots,
            None => hosts.push((host, slots)),
        }
    }
    Ok(hosts)
}

/// Total memory in Gb by host from `qhost -q -xml`, restricted to hosts serving the queue list
fn parse_sge_mem(xml: &str, queue: &str) -> Result<Vec<(String, f64)>, DiscoveryError> {
    const COMMAND: &str = "qhost";
    let host_re = Regex::new(r#"(?s)<host name=['"]([^'"]+)['"]>(.*?)</host>"#).unwrap();
    let queue_re = Regex::new(r#"<queue name=['"]([^'"]+)['"]"#).unwrap();
    let mem_re = Regex::new(r#"<hostvalue name=['"]mem_total['"]>([^<]*)</hostvalue>"#).unwrap();

    let queue_names = queue.split(',').filter(|x| !x.is_empty()).collect::<Vec<_>>();
    let mut hosts = Vec::new();
    for cap in host_re.captures_iter(xml) {
        let (host, block) = (&cap[1], &cap[2]);
        let is_queue_host = queue_re.captures_iter(block).any(|x| {
            queue_names.is_empty() || queue_names.iter().any(|q| x[1].contains(q))
        });
        if !is_queue_host {
            continue;
        }
        let mem_total = match mem_re.captures(block) {
            Some(x) => x[1].trim().to_string(),
            None => continue,
        };
        let multiplier = match mem_total.chars().last().map(|x| x.to_ascii_lowercase()) {
            Some('g') => 1.0,
            Some('m') => 1.0 / 1024.0,
            Some('t') => 1024.0,
            _ => {
                return Err(parse_error(
                    COMMAND,
                    format!("unrecognized suffix in mem_total '{mem_total}'"),
                ));
            }
        };
        let value = mem_total[..mem_total.len() - 1]
            .parse::<f64>()
            .map_err(|_| parse_error(COMMAND, format!("unexpected mem_total '{mem_total}'")))?;
        hosts.push((host.to_string(), value * multiplier));
    }
    Ok(hosts)
}

/// Pick the representative SGE node: the host with the lower median memory per slot
pub fn parse_sge_info(
    qstat_xml: &str,
    qhost_xml: &str,
    queue: &str,
) -> Result<Vec<MachineInfo>, DiscoveryError> {
    let slot_info = parse_sge_slots(qstat_xml)?;
    let mem_info = parse_sge_mem(qhost_xml, queue)?;

    let mut machines = Vec::new();
    for (host, slots) in slot_info.into_iter().filter(|(_, s)| *s > 0) {
        let mem = match mem_info.iter().find(|(x, _)| *x == host) {
            Some((_, m)) => *m,
            None => {
                return Err(parse_error("qhost", format!("no memory reported for host '{host}'")));
            }
        };
        if !mem.is_finite() {
            return Err(parse_error("qhost", format!("invalid memory reported for host '{host}'")));
        }
        machines.push((slots, mem, mem / slots as f64));
    }
    if machines.is_empty() {
        return Err(parse_error("qstat", "no hosts with slots found"));
    }

    let mut ratios = machines.iter().map(|x| x.2).collect::<Vec<_>>();
    ratios.sort_by(|a, b| a.total_cmp(b));
    let median_left = ratios[(ratios.len() - 1) / 2];
    let (slots, mem) = match machines.iter().find(|x| x.2 == median_left) {
        Some(x) => (&x.0, &x.1),
        None => return Err(parse_error("qhost", "no host matches the median memory per slot")),
    };
    Ok(vec![MachineInfo {
        cores: *slots,
        memory: *mem,
        name: "sge_machine".to_string(),
    }])
}

fn sge_info(queue: &str) -> Result<Vec<MachineInfo>, DiscoveryError> {
    let qhost_out = run_query("qhost", &["-q", "-xml"])?;
    let mut qstat_args = vec!["-f", "-xml"];
    if !queue.is_empty() && !queue.contains(',') {
        qstat_args.extend(["-q", queue]);
    }
    let qstat_out = run_query("qstat", &qstat_args)?;
    parse_sge_info(&qstat_out, &qhost_out, queue)
}

/// Query the scheduler's command-line tools for node resources
pub fn query_scheduler(
    scheduler: Scheduler,
    queue: &str,
) -> Result<Vec<MachineInfo>, DiscoveryError> {
    match scheduler {
        Scheduler::Slurm => slurm_info(queue),
        Scheduler::Torque => torque_info(queue),
        Scheduler::Sge => sge_info(queue),
        x => Err(DiscoveryError::Unsupported(x)),
    }
}

/// Discover node resources by running the 'machine_info' task on a cluster engine
fn probe_machine_info(
    context: &RunContext,
    parallel: &ParallelConfig,
) -> SimpleResult<Vec<MachineInfo>> {
    let probe_item = WorkItem::new("machine_info", context.config.clone());
    let options = PhaseOptions::default();
    let results = prun::start(context, parallel, &[probe_item], &options, |runner| {
        runner.run_parallel(
            "machine_info",
            vec![vec![TaskValue::Config(context.config.clone())]],
        )
    })?;

    let minfos = results
        .into_iter()
        .filter_map(|x| match x {
            TaskValue::Machine(m) => Some(m),
            _ => None,
        })
        .collect::<Vec<_>>();
    if minfos.is_empty() {
        bail!("Machine information probe task returned no results");
    }
    Ok(minfos)
}

/// Retrieve node resources for a cluster configuration, preferring scheduler introspection
fn get_machine_info(
    context: &RunContext,
    parallel: &ParallelConfig,
) -> SimpleResult<Vec<MachineInfo>> {
    let queried = match (parallel.scheduler, parallel.queue.as_deref()) {
        (Some(scheduler), Some(queue)) => query_scheduler(scheduler, queue),
        _ => Err(DiscoveryError::NoScheduler),
    };
    queried.or_else(|err| {
        warn!("Couldn't get machine information from the scheduler ({err}), submitting probe job to queue");
        probe_machine_info(context, parallel)
    })
}

/// Write the cluster node resource cache for this scheduler and queue, if not already present
pub fn write_info(context: &RunContext, parallel: &ParallelConfig) -> SimpleResult<()> {
    if !parallel.is_distributed() {
        return Ok(());
    }
    let out_file = get_cache_file(context.dirs, parallel);
    if out_file.exists() {
        return Ok(());
    }

    let minfos = get_machine_info(context, parallel)?;

    if let Some(dir) = out_file.parent() {
        create_dir_all(dir, "provenance");
    }
    info!("Writing system information to file: '{out_file}'");
    let f = try_with!(
        File::create(&out_file),
        "Unable to create system information file: '{out_file}'"
    );
    try_with!(
        serde_yaml::to_writer(f, &minfos),
        "Unable to write system information file: '{out_file}'"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use approx::assert_ulps_eq;

    use super::*;
    use crate::config::MachineSpec;
    use crate::distributed::ParallelType;

    fn cluster_parallel() -> ParallelConfig {
        let mut parallel = ParallelConfig::new(ParallelType::Cluster, 64);
        parallel.scheduler = Some(Scheduler::Slurm);
        parallel.queue = Some("general".to_string());
        parallel
    }

    #[test]
    fn test_combine_machine_info() {
        let x = MachineInfo {
            cores: 16,
            memory: 64.0,
            name: "n1".to_string(),
        };
        assert_eq!(combine_machine_info(vec![x.clone()]).unwrap(), x);
        assert_eq!(combine_machine_info(vec![x.clone(), x.clone()]).unwrap(), x);

        let mut y = x.clone();
        y.cores = 8;
        assert!(combine_machine_info(vec![x, y]).is_err());
        assert!(combine_machine_info(Vec::new()).is_err());
    }

    #[test]
    fn test_local_machine_info() {
        let minfo = machine_info();
        assert_eq!(minfo.len(), 1);
        assert!(minfo[0].cores > 0);
    }

    #[test]
    fn test_machine_override() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = Dirs::new(camino::Utf8Path::from_path(dir.path()).unwrap());
        let resources = Resources {
            machine: Some(MachineSpec {
                cores: 12,
                memory: 48.0,
            }),
            ..Default::default()
        };
        let sysinfo = get_info(&dirs, &cluster_parallel(), &resources).unwrap();
        assert_eq!(sysinfo.cores, Some(12));
        assert_eq!(sysinfo.memory, Some(48.0));
    }

    #[test]
    fn test_cluster_cache() {
        let dir = tempfile::tempdir().unwrap();
        let dirs = Dirs::new(camino::Utf8Path::from_path(dir.path()).unwrap());
        let parallel = cluster_parallel();

        // No cache yet, so no ceilings
        let sysinfo = get_info(&dirs, &parallel, &Resources::default()).unwrap();
        assert_eq!(sysinfo, SystemInfo::default());

        let cache_file = get_cache_file(&dirs, &parallel);
        assert!(cache_file.as_str().ends_with("provenance/system-slurm-general.yaml"));
        std::fs::create_dir_all(cache_file.parent().unwrap()).unwrap();
        std::fs::write(&cache_file, "- cores: 16\n  memory: 61.5\n  name: slurm_machine\n").unwrap();

        let sysinfo = get_info(&dirs, &parallel, &Resources::default()).unwrap();
        assert_eq!(sysinfo.cores, Some(16));
        assert_eq!(sysinfo.memory, Some(61.5));

        // A different queue has its own cache
        let mut other = parallel.clone();
        other.queue = Some("highmem".to_string());
        assert_eq!(
            get_info(&dirs, &other, &Resources::default()).unwrap(),
            SystemInfo::default()
        );
    }

    #[test]
    fn test_slurm_parse() {
        let minfo = parse_slurm_info("16 64000+ 10\n").unwrap();
        assert_eq!(minfo[0].cores, 16);
        assert_ulps_eq!(minfo[0].memory, 62.5);

        // Small clusters reserve controller memory
        let minfo = parse_slurm_info("32 128000 2").unwrap();
        assert_ulps_eq!(minfo[0].memory, 122000.0 / 1024.0);

        assert!(parse_slurm_info("").is_err());
        assert!(parse_slurm_info("16 lots 2").is_err());
        assert!(parse_slurm_info("16 64000").is_err());
    }

    const QSTAT_QF: &str = "Queue: batch
    queue_type = Execution
    acl_hosts = node2.cluster.org,node3.cluster.org,
        node4.cluster.org
    enabled = True
";

    const PBSNODES: &str = "node1
     state = free
     np = 8
     status = opsys=linux,physmem=16000000kb,ncpus=8
node3
     state = free
     np = 16
     status = opsys=linux,physmem=67108864kb,ncpus=16
";

    #[test]
    fn test_torque_parse() {
        let nodes = parse_torque_queue_nodes(QSTAT_QF);
        assert_eq!(nodes, vec!["node2", "node3", "node4"]);

        let minfo = parse_torque_pbsnodes(PBSNODES, &nodes).unwrap();
        assert_eq!(minfo[0].name, "node3");
        assert_eq!(minfo[0].cores, 16);
        assert_ulps_eq!(minfo[0].memory, 64.0);

        let minfo = parse_torque_pbsnodes(PBSNODES, &[]).unwrap();
        assert_eq!(minfo[0].name, "node1");
        assert_eq!(minfo[0].cores, 8);

        assert!(parse_torque_pbsnodes("node9\n     state = down\n", &[]).is_err());
    }

    const SGE_QSTAT: &str = "<?xml version='1.0'?>
<job_info>
  <queue_info>
    <Queue-List>
      <name>all.q@node1.local</name>
      <slots_total>8</slots_total>
    </Queue-List>
    <Queue-List>
      <name>all.q@node2.local</name>
      <slots_total>16</slots_total>
    </Queue-List>
    <Queue-List>
      <name>all.q@node3.local</name>
      <slots_total>16</slots_total>
    </Queue-List>
  </queue_info>
</job_info>
";

    const SGE_QHOST: &str = "<?xml version='1.0'?>
<qhost>
 <host name='global'>
   <hostvalue name='mem_total'>-</hostvalue>
 </host>
 <host name='node1.local'>
   <hostvalue name='num_proc'>8</hostvalue>
   <hostvalue name='mem_total'>32.0G</hostvalue>
   <queue name='all.q'>
   </queue>
 </host>
 <host name='node2.local'>
   <hostvalue name='mem_total'>64.0G</hostvalue>
   <queue name='all.q'>
   </queue>
 </host>
 <host name='node3.local'>
   <hostvalue name='mem_total'>131072M</hostvalue>
   <queue name='all.q'>
   </queue>
 </host>
</qhost>
";

    #[test]
    fn test_sge_parse() {
        // Memory per slot is 4, 4 and 8 Gb, so the left median is the first 4 Gb host
        let minfo = parse_sge_info(SGE_QSTAT, SGE_QHOST, "all.q").unwrap();
        assert_eq!(minfo[0].cores, 8);
        assert_ulps_eq!(minfo[0].memory, 32.0);
        assert_eq!(minfo[0].name, "sge_machine");

        assert!(parse_sge_info(SGE_QSTAT, SGE_QHOST, "other.q").is_err());
        assert!(parse_sge_info("", SGE_QHOST, "").is_err());

        let nan_qhost = SGE_QHOST.replace("32.0G", "nanG");
        assert!(matches!(
            parse_sge_info(SGE_QSTAT, &nan_qhost, "all.q"),
            Err(DiscoveryError::Parse { .. })
        ));
    }

    #[test]
    fn test_unsupported_scheduler() {
        assert!(matches!(
            query_scheduler(Scheduler::Lsf, "normal"),
            Err(DiscoveryError::Unsupported(Scheduler::Lsf))
        ));
    }
}
