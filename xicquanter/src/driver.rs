use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use clap::Parser;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use xicquant::quantify::{label_group_keys, label_group_report, QuantError};
use xicquant::worker::{Job, RecalculationWorker, WorkerError, WorkerEvent};
use xicquant::{Document, HierarchyError, IntegralData, NodeKind, QuantSettings, RecalculationSummary};

use crate::args::{
    ArgIsotopicModels, ArgMassCorrelationMode, ArgRatioReference, ArgReadMode, ArgWeighting,
};
use crate::input::{open_input, DocumentRecord};
use crate::progress::ProgressRecord;
use crate::write::{open_output, write_integrals, write_ratios};

#[derive(Debug, Error)]
pub enum XicQuanterError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to parse the input document: {0}")]
    DocumentParseError(#[from] serde_json::Error),
    #[error("The input document is invalid: {0}")]
    InvalidDocument(#[from] HierarchyError),
    #[error("Failed to read the configuration: {0}")]
    ConfigurationError(#[from] Box<figment::Error>),
    #[error("Recalculation failed: {0}")]
    WorkerError(#[from] WorkerError),
    #[error("Failed to compute ratios: {0}")]
    QuantError(#[from] QuantError),
    #[error("Failed to start the thread pool: {0}")]
    ThreadPoolError(#[from] rayon::ThreadPoolBuildError),
}

impl From<figment::Error> for XicQuanterError {
    fn from(value: figment::Error) -> Self {
        Self::ConfigurationError(Box::new(value))
    }
}

fn default_output_file() -> PathBuf {
    PathBuf::from("-")
}

fn default_threads() -> i32 {
    -1
}

/// Quantify the extracted ion chromatograms of isotope-labeled cross-linked peptides.
///
/// Read a JSON document describing each file's traced label groups, score and integrate
/// every crosslink's peak, and write the integrals and label state ratios as TSV.
#[derive(Parser, Debug, Deserialize, Serialize)]
#[command(author, version)]
pub struct XicQuanter {
    /// The path to read the input document from, or if '-' is passed, read from STDIN
    #[arg()]
    pub input_file: String,

    /// The path to write the integral table to, or if '-' is passed, write to STDOUT.
    ///
    /// Paths ending in `.gz` are gzip compressed.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    #[serde(default = "default_output_file")]
    pub output_file: PathBuf,

    /// The path to write the label state ratio table to
    #[arg(short = 'R', long = "ratio-file")]
    #[serde(default)]
    pub ratio_file: Option<PathBuf>,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `xicquanter.toml` in the working directory.
    /// Environment variables prefixed with `XICQUANTER_` will be read too.
    #[arg(long = "config-file")]
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(short = 't', long = "threads", default_value_t = -1)]
    #[serde(default = "default_threads")]
    pub threads: i32,

    /// Use each label group's shared peak bounds, ignoring per-crosslink adjustments
    #[arg(long = "rt-lock")]
    #[serde(default)]
    pub rt_lock: bool,

    /// Where traces are read from while quantifying
    #[arg(short = 'm', long = "read-mode")]
    #[serde(default)]
    pub read_mode: Option<ArgReadMode>,

    /// How isotope traces are compared with the theoretical isotope pattern
    #[arg(short = 'c', long = "mass-correlation")]
    #[serde(default)]
    pub mass_correlation: Option<ArgMassCorrelationMode>,

    /// How replicates are combined into label state ratios
    #[arg(short = 'w', long = "weighting")]
    #[serde(default)]
    pub weighting: Option<ArgWeighting>,

    /// The label state ratios are normalized against
    #[arg(short = 'r', long = "reference", conflicts_with = "reference_index")]
    #[serde(default)]
    pub reference: Option<ArgRatioReference>,

    /// Normalize ratios against the label state at this position
    #[arg(long = "reference-index")]
    #[serde(default)]
    pub reference_index: Option<usize>,

    /// The isotopic model used to fill in missing theoretical isotope patterns
    #[arg(short = 'a', long = "isotopic-model")]
    #[serde(default)]
    pub isotopic_model: Option<ArgIsotopicModels>,

    #[arg(skip)]
    #[serde(default)]
    pub settings: QuantSettings,
}

impl XicQuanter {
    fn create_threadpool(&self) -> Result<rayon::ThreadPool, XicQuanterError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()?.into()
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    /// Layer the quantitation settings: this instance's own settings, then
    /// `xicquanter.toml`, then `--config-file`, then `XICQUANTER_` environment
    /// variables, then command line options.
    pub fn resolve_settings(&self) -> Result<QuantSettings, XicQuanterError> {
        let mut config =
            Figment::from(Serialized::defaults(&self.settings)).merge(Toml::file("xicquanter.toml"));
        if let Some(path) = self.config_file.as_ref() {
            config = config.merge(Toml::file_exact(path));
        }
        config = config.merge(Env::prefixed("XICQUANTER_"));
        let mut settings: QuantSettings = config.extract()?;

        if self.rt_lock {
            settings.rt_lock = true;
        }
        if let Some(mode) = self.read_mode {
            settings.read_mode = mode.into();
        }
        if let Some(mode) = self.mass_correlation {
            settings.mass_correlation = mode.into();
        }
        if let Some(weighting) = self.weighting {
            settings.weighting = weighting.into();
        }
        if let Some(reference) = self.reference {
            settings.reference = reference.into();
        }
        if let Some(index) = self.reference_index {
            settings.reference = xicquant::RatioReference::Index(index);
        }
        if let Some(model) = self.isotopic_model {
            settings.isotopic_model = model.into();
        }

        match toml::to_string(&settings) {
            Ok(text) => debug!("Effective configuration:\n{text}"),
            Err(e) => warn!("Failed to render the effective configuration: {e}"),
        }
        Ok(settings)
    }

    pub fn main(&self) -> Result<ProgressRecord, XicQuanterError> {
        info!(
            "xicquanter v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file);
        info!("Output: {}", self.output_file.display());
        let settings = self.resolve_settings()?;
        self.create_threadpool()?
            .install(|| self.run_workflow(settings))
    }

    fn read_document(&self, settings: QuantSettings) -> Result<(Document, ProgressRecord), XicQuanterError> {
        let record = DocumentRecord::from_reader(open_input(&self.input_file)?)?;
        let progress = ProgressRecord {
            files: record.files.len(),
            label_groups: record.files.iter().map(|f| f.label_groups.len()).sum(),
            crosslinks: record.n_crosslinks(),
            ..Default::default()
        };
        let document = record.build(settings)?;
        debug!("Read {} nodes", document.len());
        Ok((document, progress))
    }

    fn recalculate(&self, document: Arc<Mutex<Document>>) -> Result<RecalculationSummary, XicQuanterError> {
        let worker = RecalculationWorker::spawn(document)?;
        worker.submit(Job::RecalculateAll)?;
        let summary = loop {
            match worker.recv()? {
                WorkerEvent::Progress { done, total } => {
                    debug!("Recalculated {done}/{total} crosslinks")
                }
                WorkerEvent::Finished(summary) => break summary,
                WorkerEvent::Cancelled(summary) => {
                    warn!("Recalculation was cancelled");
                    break summary;
                }
                WorkerEvent::Failed(message) => {
                    warn!("Recalculation failed: {message}");
                    break RecalculationSummary::default();
                }
            }
        };
        worker.shutdown()?;
        Ok(summary)
    }

    fn integrate(document: &Document) -> (Vec<IntegralData>, ProgressRecord) {
        let crosslinks = document.iter_kind(NodeKind::Crosslink);
        let (rows, progress): (Vec<_>, Vec<_>) = crosslinks
            .par_iter()
            .map(|id| match document.xic_data(*id, None) {
                Ok(data) => (
                    Some(data),
                    ProgressRecord {
                        integrated: 1,
                        ..Default::default()
                    },
                ),
                Err(e) => {
                    warn!("Failed to integrate crosslink {id}: {e}");
                    (
                        None,
                        ProgressRecord {
                            integration_failures: 1,
                            ..Default::default()
                        },
                    )
                }
            })
            .unzip();
        let progress = progress
            .into_iter()
            .fold(ProgressRecord::default(), |acc, p| acc + p);
        (rows.into_iter().flatten().collect(), progress)
    }

    fn run_workflow(&self, settings: QuantSettings) -> Result<ProgressRecord, XicQuanterError> {
        let start = Instant::now();
        let (document, mut progress) = self.read_document(settings)?;
        let document = Arc::new(Mutex::new(document));

        let summary = self.recalculate(document.clone())?;
        progress.record_recalculation(&summary);
        let recalculated = Instant::now();

        let document = match document.lock() {
            Ok(document) => document,
            Err(poisoned) => poisoned.into_inner(),
        };
        let (rows, integrated) = Self::integrate(&document);
        progress += integrated;

        let mut writer = open_output(&self.output_file)?;
        write_integrals(&mut writer, &rows)?;

        if let Some(path) = self.ratio_file.as_ref() {
            let reports: Vec<_> = label_group_keys(&document)
                .into_iter()
                .filter_map(|key| match label_group_report(&document, key) {
                    Ok(report) => Some(report),
                    Err(e) => {
                        warn!("Failed to compute ratios for label group {key}: {e}");
                        None
                    }
                })
                .collect();
            progress.ratios = reports.len();
            let mut writer = open_output(path)?;
            write_ratios(&mut writer, &reports)?;
        }

        info!("Files: {}", progress.files);
        info!(
            "Crosslinks: {} | Recalculated: {} | Failed: {}",
            progress.crosslinks, progress.recalculated, progress.recalculation_failures
        );
        info!(
            "Integrated: {} | Failed: {}",
            progress.integrated, progress.integration_failures
        );
        if self.ratio_file.is_some() {
            info!("Ratios: {}", progress.ratios);
        }
        let done = Instant::now();
        info!(
            "Recalculation Time: {:0.3?} | Total Elapsed Time: {:0.3?}",
            recalculated - start,
            done - start
        );
        Ok(progress)
    }
}
