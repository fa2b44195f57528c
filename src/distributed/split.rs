//! Split inputs into independent parts, process all parts in parallel, then combine the partial
//! outputs of each input
//!
//! The split function decides what a part is, this module only tracks which partial output
//! belongs to which final output.
//!

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use simple_error::{SimpleResult, bail};

use super::{ParallelRunner, Task, TaskArgs, TaskValue};
use crate::work_item::WorkItem;

/// Combine arguments collapsed to the value of the first part, rather than listed per part
const DUPLICATE_ARGS: [&str; 2] = ["config", "sam_ref"];

/// How one input value is split
#[derive(Clone, Debug, Default)]
pub struct SplitPlan {
    /// Final output for the input, or None if the input can never produce a file output
    pub final_output: Option<Utf8PathBuf>,

    /// Arguments following the input value for each part, one of which is the part's output path
    ///
    /// No parts means the final output is already complete.
    pub parts: Vec<TaskArgs>,
}

/// Settings for one split/combine step
pub struct SplitCombine<'a> {
    /// Task run on each part
    pub parallel_name: &'a str,

    /// Task run once per final output, with the partial outputs, the final output path and the
    /// combine arguments
    pub combiner: Task<'a>,

    /// Output key of work items holding the partial, and then final, output path
    pub file_key: &'a str,

    /// Work item values forwarded from each part's result to the combiner
    pub combine_arg_keys: &'a [&'a str],

    /// Position of the output path in each part's arguments, negative positions count from the end
    pub split_outfile_i: isize,
}

impl<'a> SplitCombine<'a> {
    pub fn new(parallel_name: &'a str, combiner: Task<'a>, file_key: &'a str) -> Self {
        Self {
            parallel_name,
            combiner,
            file_key,
            combine_arg_keys: &[],
            split_outfile_i: -1,
        }
    }
}

fn set_file_key(value: &mut TaskValue, file_key: &str, path: &Utf8Path) {
    for item in value.items_mut() {
        item.set_output(file_key, path);
    }
}

fn part_output(part: &TaskArgs, outfile_i: isize) -> SimpleResult<&Utf8PathBuf> {
    let index = if outfile_i < 0 {
        part.len().checked_sub(outfile_i.unsigned_abs())
    } else {
        Some(outfile_i as usize)
    };
    match index.and_then(|i| part.get(i)) {
        Some(TaskValue::Path(x)) => Ok(x),
        _ => bail!(
            "Split part has no output path at argument position {}",
            outfile_i
        ),
    }
}

#[derive(Default)]
struct SplitTasks {
    split_args: Vec<TaskArgs>,

    /// Final output of each partial output
    combine_map: HashMap<Utf8PathBuf, Utf8PathBuf>,

    finished: Vec<TaskValue>,
    extras: Vec<TaskValue>,
}

fn get_split_tasks(
    inputs: Vec<TaskValue>,
    mut split_fn: impl FnMut(&TaskValue) -> SimpleResult<SplitPlan>,
    file_key: &str,
    outfile_i: isize,
) -> SimpleResult<SplitTasks> {
    let mut tasks = SplitTasks::default();
    let mut finished_finals: Vec<Utf8PathBuf> = Vec::new();

    for mut input in inputs {
        let plan = split_fn(&input)?;
        for part in plan.parts.iter() {
            let part_file = part_output(part, outfile_i)?;
            let final_output = match plan.final_output.as_ref() {
                Some(x) => x,
                None => bail!("Split produced part '{part_file}' without a final output"),
            };
            if let Some(existing) = tasks.combine_map.get(part_file) {
                if existing != final_output {
                    bail!(
                        "Partial output '{part_file}' is assigned to both '{existing}' and '{final_output}'"
                    );
                }
            }
            tasks
                .combine_map
                .insert(part_file.clone(), final_output.clone());
        }

        if plan.parts.is_empty() {
            match plan.final_output {
                Some(final_output) if !finished_finals.contains(&final_output) => {
                    set_file_key(&mut input, file_key, &final_output);
                    tasks.finished.push(input);
                    finished_finals.push(final_output);
                }
                _ => tasks.extras.push(input),
            }
        } else {
            for part in plan.parts {
                let mut args = vec![input.clone()];
                args.extend(part);
                tasks.split_args.push(args);
            }
        }
    }
    Ok(tasks)
}

/// Value of a work item forwarded to the combine step
fn item_arg_value(item: &WorkItem, key: &str) -> SimpleResult<TaskValue> {
    let value = match key {
        "config" => Some(TaskValue::Config(item.config.clone())),
        "sam_ref" => item.sam_ref.clone().map(TaskValue::Path),
        "region" => item.region.clone().map(TaskValue::Region),
        "name" => Some(TaskValue::Text(item.name.clone())),
        "batch" => item.batch.clone().map(TaskValue::Text),
        _ => item.outputs.get(key).cloned().map(TaskValue::Path),
    };
    match value {
        Some(x) => Ok(x),
        None => bail!(
            "Work item '{}' has no value for combine argument '{}'",
            item.name,
            key
        ),
    }
}

/// Reduce the per-part combine arguments of one final output
fn get_extra_args(extra_args: &[Vec<TaskValue>], arg_keys: &[&str]) -> Vec<TaskValue> {
    arg_keys
        .iter()
        .enumerate()
        .map(|(i, key)| {
            let mut vals = extra_args.iter().map(|xs| xs[i].clone());
            if DUPLICATE_ARGS.contains(key) {
                vals.next().unwrap_or(TaskValue::List(Vec::new()))
            } else {
                TaskValue::List(vals.collect())
            }
        })
        .collect()
}

struct FinalGroup {
    final_output: Utf8PathBuf,
    parts: Vec<Utf8PathBuf>,
    extra_args: Vec<Vec<TaskValue>>,
}

/// Group part results by final output
///
/// Returns the combine arguments for each final output, then the part results pointed at their
/// final output: the first result for each sample and final output, followed by all other
/// results.
///
fn organize_output(
    output: Vec<TaskValue>,
    combine_map: &HashMap<Utf8PathBuf, Utf8PathBuf>,
    file_key: &str,
    combine_arg_keys: &[&str],
) -> SimpleResult<(Vec<TaskArgs>, Vec<TaskValue>)> {
    let mut groups: Vec<FinalGroup> = Vec::new();
    let mut final_args: Vec<(Utf8PathBuf, String, TaskValue)> = Vec::new();
    let mut extras = Vec::new();

    for mut data in output {
        let cur_file = match &data {
            TaskValue::Item(x) => x.get_output(file_key).map(|x| x.to_path_buf()),
            _ => None,
        };
        let cur_file = match cur_file {
            Some(x) => x,
            None => {
                extras.push(data);
                continue;
            }
        };
        let cur_out = match combine_map.get(&cur_file) {
            Some(x) => x.clone(),
            None => bail!("Task output '{cur_file}' does not match any split part output"),
        };

        let group_index = match groups.iter().position(|x| x.final_output == cur_out) {
            Some(x) => x,
            None => {
                groups.push(FinalGroup {
                    final_output: cur_out.clone(),
                    parts: Vec::new(),
                    extra_args: Vec::new(),
                });
                groups.len() - 1
            }
        };
        let group = &mut groups[group_index];
        // Batched parts return one result per sample, all sharing the part output
        if !group.parts.contains(&cur_file) {
            let extra = match data.first_item() {
                Some(item) => combine_arg_keys
                    .iter()
                    .map(|key| item_arg_value(item, key))
                    .collect::<SimpleResult<Vec<_>>>()?,
                None => Vec::new(),
            };
            group.parts.push(cur_file);
            group.extra_args.push(extra);
        }

        set_file_key(&mut data, file_key, &cur_out);
        let sample = data.first_item().map(|x| x.name.clone()).unwrap_or_default();
        if final_args.iter().any(|x| x.0 == cur_out && x.1 == sample) {
            extras.push(data);
        } else {
            final_args.push((cur_out, sample, data));
        }
    }

    let combine_args = groups
        .into_iter()
        .map(|group| {
            let mut args = vec![
                TaskValue::Paths(group.parts),
                TaskValue::Path(group.final_output),
            ];
            args.extend(get_extra_args(&group.extra_args, combine_arg_keys));
            args
        })
        .collect();
    let final_args = final_args.into_iter().map(|x| x.2).chain(extras).collect();
    Ok((combine_args, final_args))
}

fn split_combine_values(
    inputs: Vec<TaskValue>,
    split_fn: impl FnMut(&TaskValue) -> SimpleResult<SplitPlan>,
    runner: &dyn ParallelRunner,
    settings: &SplitCombine,
) -> SimpleResult<Vec<TaskValue>> {
    let SplitTasks {
        split_args,
        combine_map,
        finished,
        extras,
    } = get_split_tasks(inputs, split_fn, settings.file_key, settings.split_outfile_i)?;

    let split_output = runner.run_task(Task::Named(settings.parallel_name), split_args)?;
    let (combine_args, final_args) = organize_output(
        split_output,
        &combine_map,
        settings.file_key,
        settings.combine_arg_keys,
    )?;
    runner.run_task(settings.combiner, combine_args)?;

    Ok(finished.into_iter().chain(final_args).chain(extras).collect())
}

/// Split each input, run all parts together, then combine the parts of each input
///
/// Returns the already complete inputs, then the combined results, then inputs with no file
/// output.
///
pub fn parallel_split_combine(
    inputs: Vec<WorkItem>,
    split_fn: impl FnMut(&TaskValue) -> SimpleResult<SplitPlan>,
    runner: &dyn ParallelRunner,
    settings: &SplitCombine,
) -> SimpleResult<Vec<TaskValue>> {
    let inputs = inputs.into_iter().map(TaskValue::Item).collect();
    split_combine_values(inputs, split_fn, runner, settings)
}

/// As [parallel_split_combine], with inputs grouped by `group_fn` before splitting, so a group of
/// samples is split and combined as one unit
pub fn grouped_parallel_split_combine(
    inputs: Vec<WorkItem>,
    split_fn: impl FnMut(&TaskValue) -> SimpleResult<SplitPlan>,
    group_fn: impl FnOnce(Vec<WorkItem>) -> Vec<TaskValue>,
    runner: &dyn ParallelRunner,
    settings: &SplitCombine,
) -> SimpleResult<Vec<TaskValue>> {
    split_combine_values(group_fn(inputs), split_fn, runner, settings)
}

/// Group work items sharing a batch name, in order of first appearance
///
/// Items without a batch name remain single items.
///
pub fn group_by_batch(items: Vec<WorkItem>) -> Vec<TaskValue> {
    let mut grouped: Vec<TaskValue> = Vec::new();
    let mut batch_index: HashMap<String, usize> = HashMap::new();
    for item in items {
        match item.batch.clone() {
            Some(batch) => match batch_index.get(&batch) {
                Some(&i) => {
                    if let TaskValue::Group(members) = &mut grouped[i] {
                        members.push(item);
                    }
                }
                None => {
                    batch_index.insert(batch, grouped.len());
                    grouped.push(TaskValue::Group(vec![item]));
                }
            },
            None => grouped.push(TaskValue::Item(item)),
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::config::RunConfig;
    use crate::distributed::multi::MulticoreRunner;
    use crate::distributed::tasks::{TaskContext, TaskRegistry};
    use crate::distributed::worker_log::LogSink;
    use crate::distributed::{JobSizing, ParallelConfig, ParallelType};
    use crate::region::Region;

    const FILE_KEY: &str = "calls";

    /// Registry with a 'process' task, which records the part output on each sample of the input
    /// without writing any files
    fn test_registry(process_count: Arc<AtomicUsize>) -> TaskRegistry {
        let mut registry = TaskRegistry::default();
        registry.register("process", move |_, args| {
            process_count.fetch_add(1, Ordering::SeqCst);
            let (value, region, out) = match &args[..] {
                [value, TaskValue::Region(region), TaskValue::Path(out)] => (value, region, out),
                _ => panic!("unexpected process arguments"),
            };
            let members = match value {
                TaskValue::Item(x) => vec![x.clone()],
                TaskValue::Group(x) => x.clone(),
                _ => panic!("unexpected process input"),
            };
            Ok(members
                .into_iter()
                .map(|mut x| {
                    x.region = Some(region.clone());
                    x.set_output(FILE_KEY, out);
                    TaskValue::Item(x)
                })
                .collect())
        });
        registry.register("combine", |_, _| Ok(Vec::new()));
        registry
    }

    fn test_parallel() -> ParallelConfig {
        let mut parallel = ParallelConfig::new(ParallelType::Local, 4);
        parallel.sizing = Some(JobSizing {
            cores_per_job: 1,
            num_jobs: 4,
            mem: "1.3".to_string(),
            mem_pct: 1.0,
        });
        parallel
    }

    fn sample(name: &str, batch: Option<&str>) -> WorkItem {
        let mut item = WorkItem::new(name, RunConfig::default());
        item.batch = batch.map(|x| x.to_string());
        item.sam_ref = Some("/ref/genome.fa".into());
        item
    }

    fn input_name(value: &TaskValue) -> String {
        match value {
            TaskValue::Item(x) => x.name.clone(),
            TaskValue::Group(x) => x[0].batch.clone().unwrap(),
            _ => panic!("unexpected input"),
        }
    }

    /// Split every input into `region_count` regions
    fn region_split(region_count: u64) -> impl FnMut(&TaskValue) -> SimpleResult<SplitPlan> {
        move |value| {
            let name = input_name(value);
            let parts = (0..region_count)
                .map(|i| {
                    vec![
                        TaskValue::Region(Region::new("chr1", i * 100, (i + 1) * 100).unwrap()),
                        TaskValue::Path(format!("/work/{name}-{i}.txt").into()),
                    ]
                })
                .collect();
            Ok(SplitPlan {
                final_output: Some(format!("/work/{name}.txt").into()),
                parts,
            })
        }
    }

    type CombineLog = Arc<Mutex<Vec<TaskArgs>>>;

    fn recording_combiner(
        combine_log: CombineLog,
    ) -> impl Fn(&TaskContext, TaskArgs) -> SimpleResult<Vec<TaskValue>> + Send + Sync {
        move |_, args| {
            combine_log.lock().unwrap().push(args);
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_split_combine_partition() {
        let process_count = Arc::new(AtomicUsize::new(0));
        let registry = test_registry(process_count.clone());
        let sink = LogSink::new();
        let runner = MulticoreRunner::new(test_parallel(), &registry, sink.worker_log("test"));
        let combine_log = CombineLog::default();
        let combiner = recording_combiner(combine_log.clone());

        let mut settings = SplitCombine::new("process", Task::Local("combine", &combiner), FILE_KEY);
        settings.combine_arg_keys = &["sam_ref", "region"];

        let inputs = vec![sample("s1", None), sample("s2", None)];
        let out = parallel_split_combine(inputs, region_split(3), &runner, &settings).unwrap();
        assert_eq!(process_count.load(Ordering::SeqCst), 6);

        // One entry per logical sample, pointed at its final output
        assert_eq!(out.len(), 6);
        let first = out[0].first_item().unwrap();
        assert_eq!(first.name, "s1");
        assert_eq!(first.get_output(FILE_KEY).unwrap(), "/work/s1.txt");
        assert_eq!(out[1].first_item().unwrap().name, "s2");

        // Combine jobs run concurrently, so restore the order of the final outputs
        let mut combine_args = combine_log.lock().unwrap().clone();
        combine_args.sort_by_key(|x| format!("{:?}", x[1]));
        assert_eq!(combine_args.len(), 2);
        let mut seen = HashSet::new();
        for (args, name) in combine_args.iter().zip(["s1", "s2"]) {
            let parts = match &args[0] {
                TaskValue::Paths(x) => x.clone(),
                _ => panic!("unexpected combine parts"),
            };
            let expected = (0..3)
                .map(|i| Utf8PathBuf::from(format!("/work/{name}-{i}.txt")))
                .collect::<Vec<_>>();
            assert_eq!(parts, expected);
            for part in parts {
                assert!(seen.insert(part));
            }
            assert_eq!(args[1], TaskValue::Path(format!("/work/{name}.txt").into()));

            // Reference is collapsed to one value, regions are listed per part
            assert_eq!(args[2], TaskValue::Path("/ref/genome.fa".into()));
            match &args[3] {
                TaskValue::List(x) => assert_eq!(x.len(), 3),
                _ => panic!("unexpected region combine argument"),
            }
        }
    }

    #[test]
    fn test_already_complete_and_no_output() {
        let process_count = Arc::new(AtomicUsize::new(0));
        let registry = test_registry(process_count.clone());
        let sink = LogSink::new();
        let runner = MulticoreRunner::new(test_parallel(), &registry, sink.worker_log("test"));
        let combine_log = CombineLog::default();
        let combiner = recording_combiner(combine_log.clone());
        let settings = SplitCombine::new("process", Task::Local("combine", &combiner), FILE_KEY);

        let split_fn = |value: &TaskValue| -> SimpleResult<SplitPlan> {
            let name = input_name(value);
            Ok(match name.as_str() {
                "done" | "done_again" => SplitPlan {
                    final_output: Some("/work/done.txt".into()),
                    parts: Vec::new(),
                },
                _ => SplitPlan::default(),
            })
        };
        let inputs = vec![
            sample("unaligned", None),
            sample("done", None),
            sample("done_again", None),
        ];
        let out = parallel_split_combine(inputs.clone(), split_fn, &runner, &settings).unwrap();

        assert_eq!(process_count.load(Ordering::SeqCst), 0);
        assert!(combine_log.lock().unwrap().is_empty());

        // Finished first, then extras
        assert_eq!(out.len(), 3);
        let done = out[0].first_item().unwrap();
        assert_eq!(done.name, "done");
        assert_eq!(done.get_output(FILE_KEY).unwrap(), "/work/done.txt");
        assert_eq!(out[1], TaskValue::Item(inputs[0].clone()));
        assert!(out[1].first_item().unwrap().get_output(FILE_KEY).is_none());
        assert_eq!(out[2], TaskValue::Item(inputs[2].clone()));
    }

    #[test]
    fn test_grouped_batch() {
        let process_count = Arc::new(AtomicUsize::new(0));
        let registry = test_registry(process_count.clone());
        let sink = LogSink::new();
        let runner = MulticoreRunner::new(test_parallel(), &registry, sink.worker_log("test"));
        let combine_log = CombineLog::default();
        let combiner = recording_combiner(combine_log.clone());
        let settings = SplitCombine::new("process", Task::Local("combine", &combiner), FILE_KEY);

        let inputs = vec![
            sample("mother", Some("famA")),
            sample("solo", None),
            sample("father", Some("famA")),
        ];
        let out = grouped_parallel_split_combine(
            inputs,
            region_split(2),
            group_by_batch,
            &runner,
            &settings,
        )
        .unwrap();

        // Batch is processed as one unit per region
        assert_eq!(process_count.load(Ordering::SeqCst), 4);

        // Every sample reappears first, followed by the remaining part results
        assert_eq!(out.len(), 6);
        let names = out[..3]
            .iter()
            .map(|x| x.first_item().unwrap().name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["mother", "father", "solo"]);

        for value in out.iter() {
            let item = value.first_item().unwrap();
            let expected = match item.batch.as_deref() {
                Some("famA") => "/work/famA.txt",
                _ => "/work/solo.txt",
            };
            assert_eq!(item.get_output(FILE_KEY).unwrap(), expected);
        }

        // Each batch part is combined once, not once per sample
        let combine_args = combine_log.lock().unwrap().clone();
        assert_eq!(combine_args.len(), 2);
        for args in combine_args {
            match &args[0] {
                TaskValue::Paths(x) => assert_eq!(x.len(), 2),
                _ => panic!("unexpected combine parts"),
            }
        }
    }

    #[test]
    fn test_group_by_batch() {
        let grouped = group_by_batch(vec![
            sample("a", Some("b1")),
            sample("b", None),
            sample("c", Some("b1")),
            sample("d", Some("b2")),
        ]);
        assert_eq!(grouped.len(), 3);
        match &grouped[0] {
            TaskValue::Group(x) => {
                assert_eq!(x.iter().map(|x| x.name.as_str()).collect::<Vec<_>>(), ["a", "c"]);
            }
            _ => panic!("expected sample group"),
        }
        assert!(matches!(grouped[1], TaskValue::Item(_)));
    }

    #[test]
    fn test_split_errors() {
        let process_count = Arc::new(AtomicUsize::new(0));
        let registry = test_registry(process_count);
        let sink = LogSink::new();
        let runner = MulticoreRunner::new(test_parallel(), &registry, sink.worker_log("test"));
        let settings = SplitCombine::new("process", Task::Named("combine"), FILE_KEY);

        // A part shared by inputs with the same final output is allowed
        let shared_part = |_: &TaskValue| -> SimpleResult<SplitPlan> {
            Ok(SplitPlan {
                final_output: Some("/work/final.txt".into()),
                parts: vec![vec![
                    TaskValue::Region(Region::NoChrom),
                    TaskValue::Path("/work/shared.txt".into()),
                ]],
            })
        };
        let inputs = vec![sample("s1", None), sample("s2", None)];
        assert!(parallel_split_combine(inputs.clone(), shared_part, &runner, &settings).is_ok());

        // Two final outputs claiming the same part
        let mut count = 0;
        let conflicting = |_: &TaskValue| -> SimpleResult<SplitPlan> {
            count += 1;
            Ok(SplitPlan {
                final_output: Some(format!("/work/final{count}.txt").into()),
                parts: vec![vec![
                    TaskValue::Region(Region::NoChrom),
                    TaskValue::Path("/work/shared.txt".into()),
                ]],
            })
        };
        assert!(parallel_split_combine(inputs.clone(), conflicting, &runner, &settings).is_err());

        // Output path not at the configured position
        let mut settings = SplitCombine::new("process", Task::Named("combine"), FILE_KEY);
        settings.split_outfile_i = 0;
        assert!(parallel_split_combine(inputs, region_split(1), &runner, &settings).is_err());
    }

    #[test]
    fn test_part_output_position() {
        let part = vec![
            TaskValue::Path("/a".into()),
            TaskValue::Region(Region::NoChrom),
            TaskValue::Path("/b".into()),
        ];
        assert_eq!(part_output(&part, -1).unwrap(), "/b");
        assert_eq!(part_output(&part, 0).unwrap(), "/a");
        assert!(part_output(&part, -2).is_err());
        assert!(part_output(&part, -4).is_err());
        assert!(part_output(&part, 5).is_err());
    }
}
