//! Run configuration
//!
//! The raw YAML run file is translated into typed records at this single boundary, everything
//! downstream works from `RunConfig` and friends.
//!

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;

use camino::{Utf8Path, Utf8PathBuf};
use log::info;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail, try_with};

use crate::work_item::WorkItem;

/// Resource requirements declared for one external program
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProgramResources {
    pub cores: Option<usize>,

    /// Memory in the '4G' or '500M' style
    pub memory: Option<String>,

    pub jvm_opts: Vec<String>,
}

/// Explicit per-node resource ceiling, overriding any discovery
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MachineSpec {
    pub cores: usize,

    /// Memory in Gb
    pub memory: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Resources {
    pub programs: BTreeMap<String, ProgramResources>,
    pub machine: Option<MachineSpec>,
}

impl Resources {
    pub fn get(&self, program: &str) -> Option<&ProgramResources> {
        self.programs.get(program)
    }

    /// Layer `other` over this set, program entries in `other` replace entries here
    pub fn merged_with(&self, other: &Resources) -> Resources {
        let mut programs = self.programs.clone();
        programs.extend(other.programs.clone());
        Resources {
            programs,
            machine: other.machine.clone().or_else(|| self.machine.clone()),
        }
    }
}

/// A tool selection as written in the algorithm section
///
/// Tools can be disabled with `false`, named directly, listed, or listed by category.
///
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ToolSelection {
    Flag(bool),
    Name(String),
    List(Vec<String>),
    ByCategory(BTreeMap<String, Vec<String>>),
}

impl ToolSelection {
    pub fn names(&self) -> Vec<&str> {
        match self {
            Self::Flag(_) => Vec::new(),
            Self::Name(x) => vec![x.as_str()],
            Self::List(x) => x.iter().map(|x| x.as_str()).collect(),
            Self::ByCategory(x) => x.values().flatten().map(|x| x.as_str()).collect(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AlgorithmConfig {
    pub aligner: Option<ToolSelection>,
    pub variantcaller: Option<ToolSelection>,
    pub svcaller: Option<ToolSelection>,
    pub peakcaller: Option<ToolSelection>,
    pub tools_off: Vec<String>,

    /// Compress task arguments before they are sent to remote engines
    pub compress_msg: bool,

    /// Cores available to the task consuming this configuration, set at dispatch time
    pub num_cores: Option<usize>,
}

impl AlgorithmConfig {
    /// Tool names configured for one of the abstract tool categories, such as 'aligner'
    pub fn tool_names(&self, category: &str) -> Vec<&str> {
        let selection = match category {
            "aligner" => &self.aligner,
            "variantcaller" => &self.variantcaller,
            "svcaller" => &self.svcaller,
            "peakcaller" => &self.peakcaller,
            _ => return Vec::new(),
        };
        selection.as_ref().map(|x| x.names()).unwrap_or_default()
    }

    /// True if VQSR filtering would be run for this configuration
    pub fn use_vqsr(&self) -> bool {
        let gatk_callers = ["gatk", "gatk-haplotype"];
        !self.tools_off.iter().any(|x| x == "vqsr")
            && self
                .tool_names("variantcaller")
                .iter()
                .any(|x| gatk_callers.contains(x))
    }
}

/// Configuration carried by each work item, and the global configuration used for job sizing
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RunConfig {
    pub algorithm: AlgorithmConfig,
    pub resources: Resources,
}

/// Command templates used by the region pipeline
///
/// Templates may use the `{input}`, `{region}`, `{output}` and `{cores}` placeholders. The
/// combine template additionally receives `{inputs}` as a space separated list.
///
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CommandTemplates {
    pub region: String,
    pub combine: Option<String>,

    /// Extension given to per-region and final output files
    #[serde(default = "default_output_extension")]
    pub extension: String,
}

fn default_output_extension() -> String {
    "txt".to_string()
}

#[derive(Deserialize)]
struct RawMetadata {
    batch: Option<String>,
}

#[derive(Deserialize)]
struct RawSample {
    description: String,
    #[serde(default)]
    files: Vec<Utf8PathBuf>,
    metadata: Option<RawMetadata>,
    algorithm: Option<AlgorithmConfig>,
    #[serde(default)]
    resources: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Deserialize)]
struct RawRunFile {
    #[serde(default)]
    algorithm: AlgorithmConfig,
    #[serde(default)]
    resources: BTreeMap<String, serde_yaml::Value>,
    commands: CommandTemplates,
    details: Vec<RawSample>,
}

/// Fully translated run file
pub struct RunFile {
    pub config: RunConfig,
    pub commands: CommandTemplates,
    pub samples: Vec<WorkItem>,
}

fn translate_resources(raw: &BTreeMap<String, serde_yaml::Value>) -> SimpleResult<Resources> {
    let mut resources = Resources::default();
    for (name, value) in raw.iter() {
        if name == "machine" {
            let machine: MachineSpec = try_with!(
                serde_yaml::from_value(value.clone()),
                "Machine resources require both 'cores' and 'memory' (Gb) entries"
            );
            resources.machine = Some(machine);
        } else {
            let program: ProgramResources = try_with!(
                serde_yaml::from_value(value.clone()),
                "Can't parse resources for program '{name}'"
            );
            resources.programs.insert(name.clone(), program);
        }
    }
    Ok(resources)
}

fn translate_run_file(raw: RawRunFile) -> SimpleResult<RunFile> {
    if raw.details.is_empty() {
        bail!("Run configuration does not list any samples under 'details'");
    }
    if raw.commands.region.is_empty() {
        bail!("Run configuration requires a 'commands.region' template");
    }

    let config = RunConfig {
        algorithm: raw.algorithm,
        resources: translate_resources(&raw.resources)?,
    };

    let mut samples = Vec::new();
    for sample in raw.details {
        let sample_resources = translate_resources(&sample.resources)?;
        let item_config = RunConfig {
            algorithm: sample.algorithm.unwrap_or_else(|| config.algorithm.clone()),
            resources: config.resources.merged_with(&sample_resources),
        };
        let mut item = WorkItem::new(&sample.description, item_config);
        item.files = sample.files;
        item.batch = sample.metadata.and_then(|x| x.batch);
        samples.push(item);
    }

    Ok(RunFile {
        config,
        commands: raw.commands,
        samples,
    })
}

pub fn parse_run_file_str(content: &str) -> SimpleResult<RunFile> {
    let raw: RawRunFile = try_with!(serde_yaml::from_str(content), "Invalid run configuration");
    translate_run_file(raw)
}

pub fn read_run_file(filename: &Utf8Path) -> SimpleResult<RunFile> {
    info!("Reading run configuration from file: '{filename}'");
    let file = try_with!(
        File::open(filename),
        "Unable to open run configuration file: '{filename}'"
    );
    let raw: RawRunFile = try_with!(
        serde_yaml::from_reader(BufReader::new(file)),
        "Unable to parse run configuration file: '{filename}'"
    );
    translate_run_file(raw)
}
