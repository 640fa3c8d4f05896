use std::fs;
use std::io::{self, prelude::*, BufReader};
use std::path::PathBuf;

use flate2::bufread::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use tracing::debug;

use xicquant::hierarchy::{
    ChargeAttrs, CrosslinkAttrs, FileAttrs, IsotopeAttrs, LabelGroupAttrs,
};
use xicquant::isotopic_model::{mass_charge_ratio, PROTON};
use xicquant::{
    Document, DocumentBuilder, HierarchyError, LinearRange, MemoryArrayStore, QuantSettings,
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

fn default_checked() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsotopeRecord {
    #[serde(default)]
    pub key: Option<u32>,
    #[serde(default)]
    pub theoretical_mz: Option<f64>,
    #[serde(default)]
    pub abundance: Option<f64>,
    #[serde(default = "default_checked")]
    pub checked: bool,
    pub intensity: Vec<f64>,
    #[serde(default)]
    pub mz: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRecord {
    pub charge: i32,
    #[serde(default)]
    pub mz: Option<f64>,
    #[serde(default = "default_checked")]
    pub checked: bool,
    pub isotopes: Vec<IsotopeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrosslinkRecord {
    pub key: u32,
    pub peptide: String,
    pub state: usize,
    pub neutral_mass: f64,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub ev: Option<f64>,
    #[serde(default = "default_checked")]
    pub checked: bool,
    #[serde(default)]
    pub peak_start: Option<usize>,
    #[serde(default)]
    pub peak_end: Option<usize>,
    pub charges: Vec<ChargeRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelGroupRecord {
    pub key: u32,
    /// The absolute `[start, end)` rows of the file's retention time axis
    pub window: (usize, usize),
    /// The shared peak bounds relative to the window, the whole window when absent
    #[serde(default)]
    pub peak: Option<(usize, usize)>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default = "default_checked")]
    pub checked: bool,
    pub crosslinks: Vec<CrosslinkRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub key: u32,
    pub name: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    pub retention_time: Vec<f64>,
    #[serde(default)]
    pub label_groups: Vec<LabelGroupRecord>,
}

/// The logical shape of a quantitation document: every file with its traced label
/// groups, crosslinks, charge states and isotopes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub files: Vec<FileRecord>,
}

impl DocumentRecord {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, serde_json::Error> {
        serde_json::from_reader(reader)
    }

    pub fn n_crosslinks(&self) -> usize {
        self.files
            .iter()
            .flat_map(|f| f.label_groups.iter())
            .map(|g| g.crosslinks.len())
            .sum()
    }

    /// Build the document tree and fill its array stores
    pub fn build(self, settings: QuantSettings) -> Result<Document, HierarchyError> {
        let mut builder = DocumentBuilder::new(settings);
        for file in self.files {
            let mut attrs = FileAttrs::new(file.name);
            attrs.path = file.path;
            let file_id = builder.add_file(
                file.key,
                attrs,
                Box::new(MemoryArrayStore::new(file.retention_time)),
            )?;
            for group in file.label_groups {
                let window = LinearRange::new(group.window.0, group.window.1);
                let peak = group
                    .peak
                    .map(|(start, end)| LinearRange::new(start, end))
                    .unwrap_or(LinearRange::new(0, window.len()));
                let mut attrs = LabelGroupAttrs::new(window, peak).with_labels(group.labels);
                attrs.checked = group.checked;
                let group_id = builder.add_label_group(file_id, group.key, attrs)?;
                for crosslink in group.crosslinks {
                    let neutral_mass = crosslink.neutral_mass;
                    let mut attrs =
                        CrosslinkAttrs::new(crosslink.peptide, crosslink.state, neutral_mass);
                    attrs.score = crosslink.score.unwrap_or(f64::NAN);
                    attrs.ev = crosslink.ev.unwrap_or(f64::NAN);
                    attrs.checked = crosslink.checked;
                    attrs.peak_start = crosslink.peak_start;
                    attrs.peak_end = crosslink.peak_end;
                    let crosslink_id = builder.add_crosslink(group_id, crosslink.key, attrs)?;
                    for charge in crosslink.charges {
                        let mz = charge
                            .mz
                            .unwrap_or_else(|| mass_charge_ratio(neutral_mass, charge.charge, PROTON));
                        let mut attrs = ChargeAttrs::new(charge.charge, mz);
                        attrs.checked = charge.checked;
                        let charge_id = builder.add_charge(
                            crosslink_id,
                            charge.charge.unsigned_abs(),
                            attrs,
                        )?;
                        for (i, isotope) in charge.isotopes.into_iter().enumerate() {
                            let mut attrs = IsotopeAttrs::new(
                                isotope.theoretical_mz.unwrap_or(f64::NAN),
                                isotope.abundance.unwrap_or(f64::NAN),
                            );
                            attrs.checked = isotope.checked;
                            builder.add_isotope(
                                charge_id,
                                isotope.key.unwrap_or(i as u32),
                                attrs,
                                isotope.intensity,
                                isotope.mz,
                            )?;
                        }
                    }
                }
            }
        }
        builder.finish()
    }
}

fn is_gzipped(buffer: &[u8]) -> bool {
    buffer.starts_with(&GZIP_MAGIC)
}

/// Open `path` for reading, or STDIN when it is `-`, transparently decompressing gzip
/// streams
pub fn open_input(path: &str) -> io::Result<Box<dyn Read>> {
    let mut reader: Box<dyn BufRead> = if path == "-" {
        Box::new(BufReader::new(io::stdin()))
    } else {
        Box::new(BufReader::new(fs::File::open(path)?))
    };
    let compressed = is_gzipped(reader.fill_buf()?);
    debug!("Reading document from {path} (compressed? {compressed})");
    if compressed {
        Ok(Box::new(MultiGzDecoder::new(reader)))
    } else {
        Ok(Box::new(reader))
    }
}
