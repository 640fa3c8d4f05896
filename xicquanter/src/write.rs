use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use itertools::Itertools;

use xicquant::quantify::RatioReport;
use xicquant::IntegralData;

pub const INTEGRAL_HEADER: &[&str] = &[
    "file",
    "labels",
    "crosslink",
    "peptide",
    "state",
    "start",
    "end",
    "area",
    "area_noise",
    "ymax",
    "ymax_noise",
    "ppm",
    "charges",
    "score",
    "ev",
    "fit",
    "dotp",
    "masscorrelation",
];

pub const RATIO_HEADER: &[&str] = &["labels_key", "labels", "ratio", "errors", "estimated", "counts"];

/// Open `path` for writing, or STDOUT when it is `-`. Paths ending in `.gz` are gzip
/// compressed.
pub fn open_output(path: &Path) -> io::Result<Box<dyn Write>> {
    if path == Path::new("-") {
        return Ok(Box::new(io::BufWriter::new(io::stdout())));
    }
    let handle = io::BufWriter::new(fs::File::create(path)?);
    let compressed = path.extension().is_some_and(|ext| ext == "gz");
    if compressed {
        Ok(Box::new(GzEncoder::new(handle, Compression::best())))
    } else {
        Ok(Box::new(handle))
    }
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NA".to_string()
    } else {
        format!("{value:.4}")
    }
}

fn format_key(key: Option<xicquant::LevelKey>) -> String {
    key.map(|k| k.to_string()).unwrap_or_default()
}

/// Write one line per crosslink, returning the number of rows written
pub fn write_integrals<W: Write>(writer: &mut W, rows: &[IntegralData]) -> io::Result<usize> {
    writeln!(writer, "{}", INTEGRAL_HEADER.join("\t"))?;
    for row in rows {
        let area = row.integrated.area;
        let ymax = row.integrated.ymax;
        let fields = [
            format_key(row.levels.file()),
            format_key(row.levels.labels()),
            format_key(row.levels.crosslink()),
            row.peptide.clone(),
            row.state.to_string(),
            format_float(row.start),
            format_float(row.end),
            format_float(area.value),
            format_float(area.baseline),
            format_float(ymax.value),
            format_float(ymax.baseline),
            format_float(row.ppm),
            row.charges.clone(),
            format_float(row.score),
            format_float(row.ev),
            format_float(row.fit),
            format_float(row.dotp),
            format_float(row.masscorrelation),
        ];
        writeln!(writer, "{}", fields.iter().join("\t"))?;
    }
    writer.flush()?;
    Ok(rows.len())
}

/// Write one line per label group key, returning the number of rows written
pub fn write_ratios<W: Write>(writer: &mut W, rows: &[RatioReport]) -> io::Result<usize> {
    writeln!(writer, "{}", RATIO_HEADER.join("\t"))?;
    for row in rows {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            row.labels_key, row.labels, row.ratio, row.errors, row.estimated, row.counts
        )?;
    }
    writer.flush()?;
    Ok(rows.len())
}
