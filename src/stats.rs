// SPDX-License-Identifier: MIT
//! Compression statistics

use std::fmt;

use serde::Serialize;

use crate::stream::StreamSizes;

/// Bytes routed through one path expression
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PathStats {
    pub path: String,
    pub blocks: u64,
    pub values: u64,
    /// Text bytes handed to the codec
    pub text_bytes: u64,
}

/// Sizes of one compressed document
///
/// Small containers and dictionaries travel in the run header streams and are
/// counted under `header`; the other categories only cover the streams of
/// large containers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompressionStats {
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub runs: u32,
    pub labels: usize,
    pub header: StreamSizes,
    pub structure: StreamSizes,
    pub whitespace: StreamSizes,
    pub special: StreamSizes,
    pub dictionaries: StreamSizes,
    pub data: StreamSizes,
    pub paths: Vec<PathStats>,
}

impl CompressionStats {
    /// Output size relative to the input
    pub fn ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            return 0.0;
        }
        self.output_bytes as f64 / self.input_bytes as f64
    }

    /// Add the numbers of another document, for batch totals
    pub fn merge(&mut self, other: &CompressionStats) {
        self.input_bytes += other.input_bytes;
        self.output_bytes += other.output_bytes;
        self.runs += other.runs;
        self.labels = self.labels.max(other.labels);
        self.header.add(other.header);
        self.structure.add(other.structure);
        self.whitespace.add(other.whitespace);
        self.special.add(other.special);
        self.dictionaries.add(other.dictionaries);
        self.data.add(other.data);
        for path in &other.paths {
            match self.paths.iter_mut().find(|p| p.path == path.path) {
                Some(mine) => {
                    mine.blocks += path.blocks;
                    mine.values += path.values;
                    mine.text_bytes += path.text_bytes;
                }
                None => self.paths.push(path.clone()),
            }
        }
    }
}

fn row(f: &mut fmt::Formatter<'_>, name: &str, sizes: StreamSizes) -> fmt::Result {
    let ratio = if sizes.raw == 0 {
        0.0
    } else {
        sizes.compressed as f64 * 100.0 / sizes.raw as f64
    };
    writeln!(
        f,
        "  {:<14}{:>12}{:>12}{:>8.1}%",
        name, sizes.raw, sizes.compressed, ratio
    )
}

impl fmt::Display for CompressionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  {:<14}{:>12}{:>12}{:>9}",
            "stream", "raw", "compressed", "ratio"
        )?;
        row(f, "header", self.header)?;
        row(f, "structure", self.structure)?;
        row(f, "whitespace", self.whitespace)?;
        row(f, "special", self.special)?;
        row(f, "dictionaries", self.dictionaries)?;
        row(f, "data", self.data)?;
        writeln!(
            f,
            "  {} -> {} bytes ({:.1}%), {} run block(s), {} label(s)",
            self.input_bytes,
            self.output_bytes,
            self.ratio() * 100.0,
            self.runs,
            self.labels
        )?;
        for path in self.paths.iter().filter(|p| p.values > 0) {
            writeln!(
                f,
                "  {:<30} {:>8} value(s) {:>10} byte(s) in {} block(s)",
                path.path, path.values, path.text_bytes, path.blocks
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_adds_up() {
        let mut total = CompressionStats::default();
        let doc = CompressionStats {
            input_bytes: 100,
            output_bytes: 40,
            runs: 1,
            labels: 5,
            data: StreamSizes { raw: 10, compressed: 4 },
            paths: vec![PathStats {
                path: "//#".into(),
                blocks: 2,
                values: 3,
                text_bytes: 9,
            }],
            ..Default::default()
        };
        total.merge(&doc);
        total.merge(&doc);
        assert_eq!(total.input_bytes, 200);
        assert_eq!(total.runs, 2);
        assert_eq!(total.labels, 5);
        assert_eq!(total.data, StreamSizes { raw: 20, compressed: 8 });
        assert_eq!(total.paths.len(), 1);
        assert_eq!(total.paths[0].values, 6);
        assert!((total.ratio() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_display_and_json() {
        let stats = CompressionStats {
            input_bytes: 10,
            output_bytes: 5,
            ..Default::default()
        };
        let table = stats.to_string();
        assert!(table.contains("structure"));
        assert!(table.contains("10 -> 5 bytes"));
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["input_bytes"], 10);
        assert_eq!(json["header"]["raw"], 0);
    }
}
