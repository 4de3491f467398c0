//! Edge capture loading
//!
//! Reads edge captures from CSV files with one `sample,level` pair per line.
//! Blank lines and `#` comments are allowed; malformed lines are logged and
//! skipped so a partially damaged capture still decodes.

use anyhow::{Context, Result};
use dcc_decoder::{Edge, EdgeSource};
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::Path;

/// Streaming edge source over a CSV capture file
pub struct CsvEdgeSource {
    lines: Lines<BufReader<File>>,
    line_no: usize,
}

impl CsvEdgeSource {
    /// Open a capture file for streaming
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open edge capture: {:?}", path))?;
        Ok(Self {
            lines: BufReader::new(file).lines(),
            line_no: 0,
        })
    }

    fn parse_line(line: &str) -> Option<Edge> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (sample, level) = line.split_once(',')?;
        let sample = sample.trim().parse::<u64>().ok()?;
        let level = match level.trim() {
            "0" | "low" | "false" => false,
            "1" | "high" | "true" => true,
            _ => return None,
        };
        Some(Edge::new(sample, level))
    }
}

impl EdgeSource for CsvEdgeSource {
    fn wait_for_edge(&mut self) -> Option<Edge> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    log::error!("read error in edge capture: {}", e);
                    return None;
                }
            };
            self.line_no += 1;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match Self::parse_line(&line) {
                Some(edge) => return Some(edge),
                None => {
                    log::warn!("skipping malformed line {}: {:?}", self.line_no, line);
                }
            }
        }
    }
}
