//! Registry of tasks which can be dispatched by name
//!
//! The registry is built once at startup, and rebuilt identically in each cluster engine process,
//! so a task name resolves to the same function on every backend.
//!

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use hhmmss::Hhmmss;
use simple_error::{SimpleResult, bail, try_with};

use super::system::machine_info;
use super::worker_log::WorkerLog;
use super::{Task, TaskArgs, TaskValue};

/// Everything a task receives from the framework besides its arguments
pub struct TaskContext {
    pub log: WorkerLog,
}

pub type TaskFn = dyn Fn(&TaskContext, TaskArgs) -> SimpleResult<Vec<TaskValue>> + Send + Sync;

/// A function dispatched directly instead of by registry name
pub type LocalTaskFn = TaskFn;

/// A task invocation handed to a wrapper, which decides how `inner` is run
pub struct WrappedCall<'a> {
    pub task_name: &'a str,
    pub wrapper_args: &'a [String],
    pub args: TaskArgs,
    pub inner: &'a dyn Fn(&TaskContext, TaskArgs) -> SimpleResult<Vec<TaskValue>>,
}

pub type WrapperFn = dyn Fn(&TaskContext, WrappedCall) -> SimpleResult<Vec<TaskValue>> + Send + Sync;

pub const MACHINE_INFO_TASK: &str = "machine_info";
pub const PROCESS_REGION_TASK: &str = "process_region";
pub const CONCAT_FILES_TASK: &str = "concat_files";
pub const TIMED_WRAPPER: &str = "timed";

#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, Arc<TaskFn>>,
    wrappers: BTreeMap<String, Arc<WrapperFn>>,
}

impl TaskRegistry {
    /// Registry with all tasks and wrappers provided by this program
    pub fn standard() -> Self {
        let mut registry = Self::default();
        registry.register(MACHINE_INFO_TASK, machine_info_task);
        registry.register(PROCESS_REGION_TASK, process_region_task);
        registry.register(CONCAT_FILES_TASK, concat_files_task);
        registry.register_wrapper(TIMED_WRAPPER, timed_wrapper);
        registry
    }

    pub fn register(
        &mut self,
        name: &str,
        f: impl Fn(&TaskContext, TaskArgs) -> SimpleResult<Vec<TaskValue>> + Send + Sync + 'static,
    ) {
        self.tasks.insert(name.to_string(), Arc::new(f));
    }

    pub fn register_wrapper(
        &mut self,
        name: &str,
        f: impl Fn(&TaskContext, WrappedCall) -> SimpleResult<Vec<TaskValue>> + Send + Sync + 'static,
    ) {
        self.wrappers.insert(name.to_string(), Arc::new(f));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn contains_wrapper(&self, name: &str) -> bool {
        self.wrappers.contains_key(name)
    }

    /// Run a registered task directly
    pub fn run(&self, name: &str, context: &TaskContext, args: TaskArgs) -> SimpleResult<Vec<TaskValue>> {
        match self.tasks.get(name) {
            Some(f) => f(context, args),
            None => bail!("No task registered with name '{name}'"),
        }
    }

    /// Run a task, optionally through a registered wrapper
    pub fn dispatch(
        &self,
        task: Task,
        wrapper: Option<&str>,
        wrapper_args: &[String],
        context: &TaskContext,
        args: TaskArgs,
    ) -> SimpleResult<Vec<TaskValue>> {
        let inner = |context: &TaskContext, args: TaskArgs| match task {
            Task::Named(name) => self.run(name, context, args),
            Task::Local(_, f) => f(context, args),
        };
        match wrapper {
            None => inner(context, args),
            Some(wrapper_name) => {
                let wrapper_fn = match self.wrappers.get(wrapper_name) {
                    Some(x) => x,
                    None => bail!("No task wrapper registered with name '{wrapper_name}'"),
                };
                let call = WrappedCall {
                    task_name: task.name(),
                    wrapper_args,
                    args,
                    inner: &inner,
                };
                wrapper_fn(context, call)
            }
        }
    }
}

fn machine_info_task(_context: &TaskContext, _args: TaskArgs) -> SimpleResult<Vec<TaskValue>> {
    Ok(machine_info().into_iter().map(TaskValue::Machine).collect())
}

/// Reports wall time for each wrapped task
fn timed_wrapper(context: &TaskContext, call: WrappedCall) -> SimpleResult<Vec<TaskValue>> {
    let start = Instant::now();
    context.log.info(format!(
        "Starting task '{}' {}",
        call.task_name,
        call.wrapper_args.join(" ")
    ));
    let result = (call.inner)(context, call.args);
    context.log.info(format!(
        "Finished task '{}' in {}",
        call.task_name,
        start.elapsed().hhmmssxxx()
    ));
    result
}

/// Path used while an output is being written, so that only complete outputs exist at the final
/// path
pub fn tmp_output_path(path: &Utf8Path) -> Utf8PathBuf {
    let file_name = path.file_name().unwrap_or("output");
    path.with_file_name(format!("{file_name}.tmp"))
}

fn finalize_output(tmp_path: &Utf8Path, path: &Utf8Path) -> SimpleResult<()> {
    try_with!(
        std::fs::rename(tmp_path, path),
        "Unable to move completed output '{tmp_path}' to '{path}'"
    );
    Ok(())
}

/// Substitute `{key}` placeholders in a command template
pub fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    let mut command = template.to_string();
    for (key, value) in values {
        command = command.replace(&format!("{{{key}}}"), value);
    }
    command
}

/// Run a shell command, failing on a non-zero exit status
pub fn run_shell_command(log: &WorkerLog, command: &str) -> SimpleResult<()> {
    log.debug(format!("Running command: {command}"));
    let output = try_with!(
        Command::new("sh").arg("-c").arg(command).output(),
        "Unable to launch command: '{command}'"
    );
    if !output.status.success() {
        bail!(
            "Command failed with {}: '{command}'\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim_end()
        );
    }
    Ok(())
}

/// Run a command template into a temporary output path, moving the output into place on success
///
/// The command is skipped if `out_path` already exists. `{output}` is filled with the temporary
/// path.
///
pub fn run_template_to_output(
    log: &WorkerLog,
    template: &str,
    values: &[(&str, String)],
    out_path: &Utf8Path,
) -> SimpleResult<()> {
    if out_path.exists() {
        log.debug(format!("Output already exists, skipping: '{out_path}'"));
        return Ok(());
    }
    if let Some(dir) = out_path.parent() {
        try_with!(
            std::fs::create_dir_all(dir),
            "Can't create output directory '{dir}'"
        );
    }
    let tmp_path = tmp_output_path(out_path);
    let mut values = values.to_vec();
    values.push(("output", tmp_path.to_string()));
    run_shell_command(log, &fill_template(template, &values))?;
    if !tmp_path.exists() {
        bail!("Command did not write expected output '{tmp_path}': '{template}'");
    }
    finalize_output(&tmp_path, out_path)
}

/// Process one region of one sample, or of one batch of samples
///
/// Arguments: item or group, region, output file key, command template, output path.
///
/// Returns one item per sample with the region and the partial output recorded under the file key.
///
fn process_region_task(context: &TaskContext, args: TaskArgs) -> SimpleResult<Vec<TaskValue>> {
    let (value, region, file_key, template, out_path) = match args.as_slice() {
        [
            value,
            TaskValue::Region(region),
            TaskValue::Text(file_key),
            TaskValue::Text(template),
            TaskValue::Path(out_path),
        ] => (value, region, file_key, template, out_path),
        _ => bail!("Unexpected arguments for task '{PROCESS_REGION_TASK}'"),
    };
    let items = match value {
        TaskValue::Item(x) => vec![x.clone()],
        TaskValue::Group(x) => x.clone(),
        _ => bail!("Task '{PROCESS_REGION_TASK}' requires a sample or sample group"),
    };
    let first = match items.first() {
        Some(x) => x,
        None => bail!("Task '{PROCESS_REGION_TASK}' received an empty sample group"),
    };

    let inputs = items
        .iter()
        .flat_map(|x| x.files.iter().map(|x| x.to_string()))
        .collect::<Vec<_>>();
    let names = items.iter().map(|x| x.name.clone()).collect::<Vec<_>>();
    let values = [
        ("input", inputs.join(" ")),
        ("region", region.to_string()),
        ("name", names.join(",")),
        ("cores", first.config.algorithm.num_cores.unwrap_or(1).to_string()),
    ];
    run_template_to_output(&context.log, template, &values, out_path)?;

    Ok(items
        .into_iter()
        .map(|mut x| {
            x.region = Some(region.clone());
            x.set_output(file_key, out_path);
            TaskValue::Item(x)
        })
        .collect())
}

/// Concatenate partial files into a final output, in the given order
pub fn concat_files(parts: &[Utf8PathBuf], out_path: &Utf8Path) -> SimpleResult<()> {
    if out_path.exists() {
        return Ok(());
    }
    if let Some(dir) = out_path.parent() {
        try_with!(
            std::fs::create_dir_all(dir),
            "Can't create output directory '{dir}'"
        );
    }
    let tmp_path = tmp_output_path(out_path);
    {
        let f = try_with!(
            File::create(&tmp_path),
            "Unable to create combined output file: '{tmp_path}'"
        );
        let mut writer = BufWriter::new(f);
        for part in parts {
            let mut reader = try_with!(File::open(part), "Unable to open partial output: '{part}'");
            try_with!(
                std::io::copy(&mut reader, &mut writer),
                "Unable to copy partial output '{part}' to '{tmp_path}'"
            );
        }
        try_with!(writer.flush(), "Unable to write combined output: '{tmp_path}'");
    }
    finalize_output(&tmp_path, out_path)
}

/// Combine step for split processing: arguments are partial files then final output path
fn concat_files_task(context: &TaskContext, args: TaskArgs) -> SimpleResult<Vec<TaskValue>> {
    let (parts, out_path) = match args.as_slice() {
        [TaskValue::Paths(parts), TaskValue::Path(out_path), ..] => (parts, out_path),
        _ => bail!("Unexpected arguments for task '{CONCAT_FILES_TASK}'"),
    };
    if parts.is_empty() {
        context
            .log
            .warn(format!("No partial files to combine into '{out_path}'"));
    }
    context.log.info(format!(
        "Combining {} partial files into '{out_path}'",
        parts.len()
    ));
    concat_files(parts, out_path)?;
    Ok(vec![TaskValue::Path(out_path.clone())])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::distributed::worker_log::LogSink;
    use crate::region::Region;
    use crate::work_item::WorkItem;

    fn test_context(sink: &LogSink) -> TaskContext {
        TaskContext {
            log: sink.worker_log("test"),
        }
    }

    #[test]
    fn test_unknown_task() {
        let sink = LogSink::new();
        let registry = TaskRegistry::standard();
        assert!(registry.contains(CONCAT_FILES_TASK));
        assert!(registry.run("nope", &test_context(&sink), Vec::new()).is_err());
    }

    #[test]
    fn test_fill_template() {
        let command = fill_template(
            "tool -r {region} {input} > {output}",
            &[
                ("region", "chr1:1-10".to_string()),
                ("input", "a.bam".to_string()),
                ("output", "out.txt".to_string()),
            ],
        );
        assert_eq!(command, "tool -r chr1:1-10 a.bam > out.txt");
    }

    #[test]
    fn test_wrapped_dispatch() {
        let sink = LogSink::new();
        let mut registry = TaskRegistry::standard();
        registry.register("echo", |_, args| Ok(args));
        registry.register_wrapper("double", |context, call| {
            let mut out = (call.inner)(context, call.args.clone())?;
            out.extend((call.inner)(context, call.args)?);
            Ok(out)
        });
        let context = test_context(&sink);
        let args = vec![TaskValue::Text("x".to_string())];

        let out = registry
            .dispatch(Task::Named("echo"), None, &[], &context, args.clone())
            .unwrap();
        assert_eq!(out.len(), 1);

        let out = registry
            .dispatch(Task::Named("echo"), Some("double"), &[], &context, args.clone())
            .unwrap();
        assert_eq!(out.len(), 2);

        let out = registry
            .dispatch(Task::Named("echo"), Some(TIMED_WRAPPER), &[], &context, args.clone())
            .unwrap();
        assert_eq!(out, args);

        assert!(
            registry
                .dispatch(Task::Named("echo"), Some("missing"), &[], &context, args)
                .is_err()
        );
    }

    #[test]
    fn test_process_region_and_concat() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let sink = LogSink::new();
        let registry = TaskRegistry::standard();
        let context = test_context(&sink);

        let mut item = WorkItem::new("s1", RunConfig::default());
        item.files.push(dir.join("s1.bam"));

        let mut parts = Vec::new();
        for (i, region) in [Region::new("chr1", 0, 10).unwrap(), Region::NoChrom]
            .into_iter()
            .enumerate()
        {
            let out_path = dir.join(format!("part{i}.txt"));
            let out = registry
                .run(
                    PROCESS_REGION_TASK,
                    &context,
                    vec![
                        TaskValue::Item(item.clone()),
                        TaskValue::Region(region.clone()),
                        TaskValue::Text("calls".to_string()),
                        TaskValue::Text("echo {name} {region} > {output}".to_string()),
                        TaskValue::Path(out_path.clone()),
                    ],
                )
                .unwrap();
            match &out[..] {
                [TaskValue::Item(x)] => {
                    assert_eq!(x.get_output("calls"), Some(out_path.as_path()));
                    assert_eq!(x.region, Some(region));
                }
                _ => panic!("unexpected task output"),
            }
            parts.push(out_path);
        }

        let final_path = dir.join("final.txt");
        registry
            .run(
                CONCAT_FILES_TASK,
                &context,
                vec![TaskValue::Paths(parts), TaskValue::Path(final_path.clone())],
            )
            .unwrap();
        let combined = std::fs::read_to_string(&final_path).unwrap();
        assert_eq!(combined, "s1 chr1:1-10\ns1 nochrom\n");
        assert!(!tmp_output_path(&final_path).exists());
    }

    #[test]
    fn test_concat_files_new_dir() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let part = dir.join("part.txt");
        std::fs::write(&part, "a\n").unwrap();

        let final_path = dir.join("final").join("nested").join("out.txt");
        concat_files(&[part.clone(), part], &final_path).unwrap();
        assert_eq!(std::fs::read_to_string(&final_path).unwrap(), "a\na\n");
    }

    #[test]
    fn test_failed_command() {
        let dir = tempfile::tempdir().unwrap();
        let dir = Utf8Path::from_path(dir.path()).unwrap();
        let sink = LogSink::new();
        let context = test_context(&sink);
        let out_path = dir.join("out.txt");
        assert!(run_template_to_output(&context.log, "exit 3", &[], &out_path).is_err());
        assert!(run_template_to_output(&context.log, "true", &[], &out_path).is_err());
        assert!(!out_path.exists());
    }
}
