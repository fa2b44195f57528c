use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::region::Region;

/// Identifies the task lineage of a work item, nested parallel calls extend the parent entity
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct Provenance {
    pub entity: String,
}

/// One unit of pipeline input, typically a sample, or one region of a sample
///
/// Work items are moved or cloned into each dispatched task, so no configuration state is ever
/// shared between concurrent workers.
///
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct WorkItem {
    /// Sample name
    pub name: String,

    /// Samples sharing a batch name are processed together by grouped split/combine steps
    pub batch: Option<String>,

    pub config: RunConfig,

    pub files: Vec<Utf8PathBuf>,

    pub region: Option<Region>,

    /// Reference sequence path
    pub sam_ref: Option<Utf8PathBuf>,

    /// Named output files produced for this item
    pub outputs: BTreeMap<String, Utf8PathBuf>,

    pub provenance: Option<Provenance>,
}

impl WorkItem {
    pub fn new(name: &str, config: RunConfig) -> Self {
        Self {
            name: name.to_string(),
            provenance: Some(Provenance {
                entity: name.to_string(),
            }),
            config,
            ..Default::default()
        }
    }

    pub fn get_output(&self, file_key: &str) -> Option<&Utf8Path> {
        self.outputs.get(file_key).map(|x| x.as_path())
    }

    pub fn set_output(&mut self, file_key: &str, path: &Utf8Path) {
        self.outputs.insert(file_key.to_string(), path.to_path_buf());
    }
}
