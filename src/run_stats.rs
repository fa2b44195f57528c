//! Track stats for each parallel phase of a run
//!

use std::fs::File;
use std::io::BufReader;

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, try_with};

pub const PHASE_STATS_FILENAME: &str = "phase.stats.json";

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PhaseStats {
    /// Checkpoint name of the phase, if any
    pub name: Option<String>,

    /// Backend the phase ran on
    pub backend: String,

    /// True if the phase ran locally because its checkpoint was already passed
    pub checkpointed: bool,

    pub cores_per_job: usize,
    pub num_jobs: usize,
    pub mem: String,

    pub elapsed_secs: f64,
}

/// Read stats for all completed phases, or an empty list if no phase has completed yet
pub fn read_phase_stats(provenance_dir: &Utf8Path) -> SimpleResult<Vec<PhaseStats>> {
    let filename = provenance_dir.join(PHASE_STATS_FILENAME);
    if !filename.exists() {
        return Ok(Vec::new());
    }
    let file = try_with!(
        File::open(&filename),
        "Unable to read phase stats json file: '{filename}'"
    );
    let all_stats = try_with!(
        serde_json::from_reader(BufReader::new(file)),
        "Unable to parse phase stats json file: '{filename}'"
    );
    Ok(all_stats)
}

/// Add stats for one completed phase to the phase stats json file
pub fn append_phase_stats(provenance_dir: &Utf8Path, stats: PhaseStats) -> SimpleResult<()> {
    let mut all_stats = read_phase_stats(provenance_dir)?;
    all_stats.push(stats);

    try_with!(
        std::fs::create_dir_all(provenance_dir),
        "Unable to create provenance directory: '{provenance_dir}'"
    );
    let filename = provenance_dir.join(PHASE_STATS_FILENAME);
    info!("Writing phase statistics to file: '{filename}'");

    let f = try_with!(
        File::create(&filename),
        "Unable to create phase statistics json file: '{filename}'"
    );
    try_with!(
        serde_json::to_writer_pretty(&f, &all_stats),
        "Unable to write phase statistics json file: '{filename}'"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_phase_stats() {
        let dir = tempfile::tempdir().unwrap();
        let provenance_dir = Utf8Path::from_path(dir.path()).unwrap().join("provenance");
        assert!(read_phase_stats(&provenance_dir).unwrap().is_empty());

        for name in ["align", "call"] {
            append_phase_stats(
                &provenance_dir,
                PhaseStats {
                    name: Some(name.to_string()),
                    backend: "local".to_string(),
                    cores_per_job: 1,
                    num_jobs: 4,
                    mem: "1.3".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
        }
        let stats = read_phase_stats(&provenance_dir).unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[1].name.as_deref(), Some("call"));
    }

    #[test]
    fn test_corrupt_phase_stats() {
        let dir = tempfile::tempdir().unwrap();
        let provenance_dir = Utf8Path::from_path(dir.path()).unwrap().to_path_buf();
        std::fs::write(provenance_dir.join(PHASE_STATS_FILENAME), "{not json").unwrap();
        assert!(read_phase_stats(&provenance_dir).is_err());
        assert!(append_phase_stats(&provenance_dir, PhaseStats::default()).is_err());
    }
}
