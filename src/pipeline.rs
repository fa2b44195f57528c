//! Region-parallel command pipeline
//!
//! Each sample (or batch of samples) is split into fixed-size genome regions, a command template
//! is run on every region, and the region outputs are combined into one final output per sample.
//!

use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use log::info;
use simple_error::{SimpleResult, bail};

use crate::config::{CommandTemplates, RunFile};
use crate::distributed::prun::{self, PhaseOptions, RunContext};
use crate::distributed::split::{
    SplitCombine, SplitPlan, group_by_batch, grouped_parallel_split_combine,
    parallel_split_combine,
};
use crate::distributed::system::write_info;
use crate::distributed::tasks::{
    CONCAT_FILES_TASK, PROCESS_REGION_TASK, TaskContext, TaskRegistry, run_template_to_output,
};
use crate::distributed::{Dirs, ParallelConfig, Task, TaskArgs, TaskValue};
use crate::log_utils::debug_msg;
use crate::region::{ContigList, Region, get_genome_work_regions};
use crate::work_item::WorkItem;

/// Output key holding each sample's region, and then final, output
pub const REGION_OUTPUT_KEY: &str = "region_output";

const REGION_PHASE_NAME: &str = "process_regions";

pub struct PipelineOptions {
    pub segment_size: u64,

    /// Restrict processing to these regions, the whole genome is processed if empty
    pub targets: Vec<Region>,

    /// Split and combine samples sharing a batch name together
    pub joint: bool,

    /// Log every generated split part
    pub debug_split: bool,
}

fn final_dir(dirs: &Dirs) -> Utf8PathBuf {
    dirs.work.join("final")
}

fn region_dir(dirs: &Dirs) -> Utf8PathBuf {
    dirs.work.join("regions")
}

/// Name used for the outputs of a sample or sample group
fn unit_name(value: &TaskValue) -> SimpleResult<String> {
    match value {
        TaskValue::Item(x) => Ok(x.name.clone()),
        TaskValue::Group(x) => match x.first() {
            Some(first) => Ok(first.batch.clone().unwrap_or_else(|| first.name.clone())),
            None => bail!("Can't split an empty sample group"),
        },
        _ => bail!("Region split requires a sample or sample group"),
    }
}

fn has_input_files(value: &TaskValue) -> bool {
    match value {
        TaskValue::Item(x) => !x.files.is_empty(),
        TaskValue::Group(x) => x.iter().any(|x| !x.files.is_empty()),
        _ => false,
    }
}

/// Plan the region parts of one sample or sample group
///
/// Inputs without any files have no region output. Inputs with a final output already in place
/// have no parts.
///
fn plan_region_split(
    value: &TaskValue,
    dirs: &Dirs,
    regions: &[Region],
    commands: &CommandTemplates,
    debug_split: bool,
) -> SimpleResult<SplitPlan> {
    let name = unit_name(value)?;
    if !has_input_files(value) {
        info!("No input files for '{name}', skipping region processing");
        return Ok(SplitPlan::default());
    }

    let final_output = final_dir(dirs).join(format!("{name}.{}", commands.extension));
    if final_output.exists() {
        info!("Final output already complete for '{name}': '{final_output}'");
        return Ok(SplitPlan {
            final_output: Some(final_output),
            parts: Vec::new(),
        });
    }

    let part_dir = region_dir(dirs).join(&name);
    let parts = regions
        .iter()
        .map(|region| {
            let part_output =
                part_dir.join(format!("{name}-{}.{}", region.to_file_label(), commands.extension));
            vec![
                TaskValue::Region(region.clone()),
                TaskValue::Text(REGION_OUTPUT_KEY.to_string()),
                TaskValue::Text(commands.region.clone()),
                TaskValue::Path(part_output),
            ]
        })
        .collect::<Vec<TaskArgs>>();
    debug_msg!(
        debug_split,
        "Split '{name}' into {} region parts for final output '{final_output}'",
        parts.len()
    );
    Ok(SplitPlan {
        final_output: Some(final_output),
        parts,
    })
}

/// Combine step running the configured combine command template
///
/// Arguments: partial outputs, final output, reference, regions.
///
fn combine_with_template(
    template: String,
) -> impl Fn(&TaskContext, TaskArgs) -> SimpleResult<Vec<TaskValue>> + Send + Sync {
    move |context, args| {
        let (parts, out_path, reference) = match args.as_slice() {
            [TaskValue::Paths(parts), TaskValue::Path(out_path), reference, ..] => {
                (parts, out_path, reference)
            }
            _ => bail!("Unexpected arguments for template combine step"),
        };
        let reference = match reference {
            TaskValue::Path(x) => x.to_string(),
            _ => String::new(),
        };
        let values = [
            ("inputs", parts.iter().join(" ")),
            ("reference", reference),
        ];
        run_template_to_output(&context.log, &template, &values, out_path)?;
        Ok(vec![TaskValue::Path(out_path.clone())])
    }
}

/// Reference fasta path matching a fasta index path
fn reference_from_fai(fai: &Utf8Path) -> Utf8PathBuf {
    match fai.as_str().strip_suffix(".fai") {
        Some(x) => Utf8PathBuf::from(x),
        None => fai.to_path_buf(),
    }
}

/// Run the region pipeline over all samples of a run file
///
/// Returns one entry per sample, each pointing at its final output when the sample had input
/// files.
///
pub fn run_region_pipeline(
    run_file: &RunFile,
    fai: &Utf8Path,
    dirs: &Dirs,
    parallel: &ParallelConfig,
    options: &PipelineOptions,
) -> SimpleResult<Vec<WorkItem>> {
    let contigs = ContigList::from_fai(fai)?;
    let regions = get_genome_work_regions(&contigs, &options.targets, options.segment_size);
    if regions.is_empty() {
        bail!("No work regions found in reference index '{fai}'");
    }
    info!(
        "Processing {} samples over {} regions",
        run_file.samples.len(),
        regions.len()
    );

    let reference = reference_from_fai(fai);
    let samples = run_file
        .samples
        .iter()
        .map(|x| {
            let mut x = x.clone();
            x.sam_ref = Some(reference.clone());
            x
        })
        .collect::<Vec<_>>();

    let registry = TaskRegistry::standard();
    let context = RunContext {
        registry: &registry,
        config: &run_file.config,
        dirs,
    };
    write_info(&context, parallel)?;

    let combine_template = run_file.commands.combine.clone().map(combine_with_template);
    let combiner = match combine_template.as_ref() {
        Some(f) => Task::Local("combine_template", f),
        None => Task::Named(CONCAT_FILES_TASK),
    };
    let mut settings = SplitCombine::new(PROCESS_REGION_TASK, combiner, REGION_OUTPUT_KEY);
    settings.combine_arg_keys = &["sam_ref", "region"];

    let split_fn = |value: &TaskValue| {
        plan_region_split(
            value,
            dirs,
            &regions,
            &run_file.commands,
            options.debug_split,
        )
    };

    let mut phase = PhaseOptions::named(REGION_PHASE_NAME);
    phase.multiplier = regions.len();
    let output = prun::start(&context, parallel, &samples, &phase, |runner| {
        if options.joint {
            grouped_parallel_split_combine(samples.clone(), split_fn, group_by_batch, runner, &settings)
        } else {
            parallel_split_combine(samples.clone(), split_fn, runner, &settings)
        }
    })?;

    let results = output
        .into_iter()
        .flat_map(TaskValue::into_items)
        .unique_by(|x| x.name.clone())
        .collect::<Vec<_>>();

    for item in results.iter() {
        match item.get_output(REGION_OUTPUT_KEY) {
            Some(x) => info!("Final output for sample '{}': '{x}'", item.name),
            None => info!("No output for sample '{}'", item.name),
        }
    }
    Ok(results)
}
