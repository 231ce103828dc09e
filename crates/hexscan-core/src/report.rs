/// Export of a finished byte histogram as JSON or CSV.
use crate::error::Result;
use crate::stats::ByteHistogram;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One byte value's share of the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ByteRow {
    pub byte: u8,
    pub hex: String,
    pub count: u64,
    pub percent: f64,
}

impl ByteRow {
    fn new(byte: u8, count: u64, length: u64) -> Self {
        let percent = if length == 0 {
            0.0
        } else {
            count as f64 * 100.0 / length as f64
        };
        Self {
            byte,
            hex: format!("{byte:02X}"),
            count,
            percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub path: Option<PathBuf>,
    pub length: u64,
    pub generated_at: DateTime<Local>,
    /// Count for every byte value, indexed by value.
    pub counts: Vec<u64>,
    pub distinct: usize,
    pub most_common: Option<ByteRow>,
}

impl StatsReport {
    pub fn new(path: Option<&Path>, histogram: &ByteHistogram) -> Self {
        let length = histogram.total();
        Self {
            path: path.map(Path::to_path_buf),
            length,
            generated_at: Local::now(),
            counts: histogram.counts().to_vec(),
            distinct: histogram.distinct(),
            most_common: histogram
                .most_common()
                .map(|(byte, count)| ByteRow::new(byte, count, length)),
        }
    }

    /// One row per byte value, 0x00 first.
    pub fn rows(&self) -> Vec<ByteRow> {
        self.counts
            .iter()
            .enumerate()
            .map(|(byte, &count)| ByteRow::new(byte as u8, count, self.length))
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Write `byte,hex,count,percent` rows with a header line.
    pub fn write_csv<W: Write>(&self, out: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(out);
        for row in self.rows() {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
