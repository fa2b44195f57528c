//! Genomic regions used as the unit of split work
//!

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};

use camino::Utf8Path;
use log::info;
use serde::{Deserialize, Serialize};
use simple_error::{SimpleResult, bail, try_with};

pub const NOCHROM_LABEL: &str = "nochrom";
pub const NOANALYSIS_LABEL: &str = "noanalysis";

/// A region is either a contig interval or one of the special non-interval work units
///
/// Intervals follow the bed convention: 0-indexed, half-open [start,end)
///
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
pub enum Region {
    Interval { contig: String, start: u64, end: u64 },

    /// Reads without a mapped contig
    NoChrom,

    /// Sequence deliberately excluded from analysis, such as off-target regions
    NoAnalysis,
}

impl Region {
    pub fn new(contig: &str, start: u64, end: u64) -> SimpleResult<Self> {
        if start > end {
            bail!("Region start is greater than end: {contig}:{start}-{end}");
        }
        Ok(Self::Interval {
            contig: contig.to_string(),
            start,
            end,
        })
    }

    /// Parse from 'samtools' region format (e.g. chr20:100-200), or one of the special labels
    ///
    /// A contig name without a position range covers the whole contig.
    ///
    pub fn from_region_str(contigs: &ContigList, region_str: &str) -> SimpleResult<Self> {
        match region_str {
            NOCHROM_LABEL => return Ok(Self::NoChrom),
            NOANALYSIS_LABEL => return Ok(Self::NoAnalysis),
            _ => {}
        }

        if let Some(contig) = contigs.get(region_str) {
            return Self::new(region_str, 0, contig.length);
        }

        let (contig_label, range_str) = match region_str.rsplit_once(':') {
            Some(x) => x,
            None => bail!("Can't find contig '{region_str}' in reference index"),
        };
        let contig = match contigs.get(contig_label) {
            Some(x) => x,
            None => bail!("Can't find contig '{contig_label}' in reference index"),
        };

        let range_str = range_str.replace(',', "");
        let (start_str, end_str) = match range_str.split_once('-') {
            Some((s, e)) => (s.to_string(), Some(e.to_string())),
            None => (range_str.clone(), None),
        };
        let start = try_with!(
            start_str.parse::<u64>(),
            "Unexpected start position in region string '{region_str}'"
        );
        if start == 0 {
            bail!("Region positions are 1-indexed in region string '{region_str}'");
        }
        let end = match end_str {
            Some(x) => try_with!(
                x.parse::<u64>(),
                "Unexpected end position in region string '{region_str}'"
            ),
            None => contig.length,
        };
        Self::new(contig_label, start - 1, end)
    }

    /// Label safe for use in output filenames
    pub fn to_file_label(&self) -> String {
        match self {
            Self::Interval { contig, start, end } => format!("{contig}_{start}_{end}"),
            Self::NoChrom => NOCHROM_LABEL.to_string(),
            Self::NoAnalysis => NOANALYSIS_LABEL.to_string(),
        }
    }

    /// Key giving the stable region order: reference contig order, then start. Special regions
    /// sort after all intervals.
    fn sort_key(&self, contigs: &ContigList) -> (usize, u64, u64) {
        match self {
            Self::Interval { contig, start, end } => {
                let index = contigs.label_to_index.get(contig).copied().unwrap_or(usize::MAX - 2);
                (index, *start, *end)
            }
            Self::NoChrom => (usize::MAX - 1, 0, 0),
            Self::NoAnalysis => (usize::MAX, 0, 0),
        }
    }

    pub fn cmp_in(&self, other: &Self, contigs: &ContigList) -> Ordering {
        self.sort_key(contigs).cmp(&other.sort_key(contigs))
    }
}

impl fmt::Display for Region {
    /// Writes the region in 'samtools' format (e.g. chr20:100-200)
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Interval { contig, start, end } => write!(f, "{contig}:{}-{end}", start + 1),
            Self::NoChrom => write!(f, "{NOCHROM_LABEL}"),
            Self::NoAnalysis => write!(f, "{NOANALYSIS_LABEL}"),
        }
    }
}

/// Sort regions into deterministic concatenation order
pub fn sort_regions(regions: &mut [Region], contigs: &ContigList) {
    regions.sort_by(|a, b| a.cmp_in(b, contigs));
}

pub struct ContigInfo {
    pub label: String,
    pub length: u64,
}

/// Contigs in reference order
#[derive(Default)]
pub struct ContigList {
    pub data: Vec<ContigInfo>,
    pub label_to_index: HashMap<String, usize>,
}

impl ContigList {
    pub fn add_contig(&mut self, label: &str, length: u64) {
        assert!(
            !self.label_to_index.contains_key(label),
            "Duplicate contig name '{label}'"
        );
        self.label_to_index.insert(label.to_string(), self.data.len());
        self.data.push(ContigInfo {
            label: label.to_string(),
            length,
        });
    }

    pub fn get(&self, label: &str) -> Option<&ContigInfo> {
        self.label_to_index.get(label).map(|&x| &self.data[x])
    }

    /// Read contig names and lengths from a samtools faidx index
    pub fn from_fai(filename: &Utf8Path) -> SimpleResult<Self> {
        info!("Reading reference contigs from index file: '{filename}'");
        let file = try_with!(
            File::open(filename),
            "Unable to open reference index file: '{filename}'"
        );
        let mut contigs = Self::default();
        for line in BufReader::new(file).lines() {
            let line = try_with!(line, "Can't read reference index file: '{filename}'");
            if line.is_empty() {
                continue;
            }
            let words = line.split('\t').collect::<Vec<_>>();
            if words.len() < 2 {
                bail!("Unexpected line format in reference index file '{filename}': '{line}'");
            }
            let length = try_with!(
                words[1].parse::<u64>(),
                "Unexpected contig length in reference index file '{filename}': '{line}'"
            );
            if contigs.label_to_index.contains_key(words[0]) {
                bail!("Duplicate contig '{}' in reference index file '{filename}'", words[0]);
            }
            contigs.add_contig(words[0], length);
        }
        Ok(contigs)
    }
}

/// Split a span of `size` bases into consecutive segments of at most `segment_size`
pub fn get_region_segments(size: u64, segment_size: u64) -> Vec<(u64, u64)> {
    assert!(segment_size > 0);
    let mut segments = Vec::new();
    let mut start = 0;
    while start < size {
        let end = std::cmp::min(start + segment_size, size);
        segments.push((start, end));
        start = end;
    }
    segments
}

/// Get fixed-size work regions covering every contig, in reference order
///
/// If `targets` is non-empty, only those regions are segmented.
///
pub fn get_genome_work_regions(
    contigs: &ContigList,
    targets: &[Region],
    segment_size: u64,
) -> Vec<Region> {
    let push_segments = |regions: &mut Vec<Region>, contig: &str, offset: u64, size: u64| {
        for (start, end) in get_region_segments(size, segment_size) {
            regions.push(Region::Interval {
                contig: contig.to_string(),
                start: start + offset,
                end: end + offset,
            });
        }
    };

    let mut regions = Vec::new();
    if targets.is_empty() {
        for contig in contigs.data.iter() {
            push_segments(&mut regions, &contig.label, 0, contig.length);
        }
    } else {
        for target in targets {
            match target {
                Region::Interval { contig, start, end } => {
                    push_segments(&mut regions, contig, *start, end - start);
                }
                _ => regions.push(target.clone()),
            }
        }
    }
    sort_regions(&mut regions, contigs);
    regions
}
