//! Sorted fact file scanner.
//!
//! A fact file holds one grain cell per line between the `VALUES_START` and
//! `VALUES_END` markers:
//!
//! ```text
//! VALUES_START
//! 0|0.0|0 10.0
//! 0|0.0|1 12.5
//! VALUES_END
//! ```
//!
//! Lines are sorted by chunk id, so the lines under any chunk prefix are
//! contiguous and a prefix scan stops at the end of the matching run. A line
//! sorting before its predecessor fails the scan.

use crate::chunk_id::ChunkId;
use crate::schema::CubeInfo;
use cubefile_common::{CubeError, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Marker opening the values section.
pub const VALUES_START: &str = "VALUES_START";

/// Marker closing the values section.
pub const VALUES_END: &str = "VALUES_END";

/// One parsed fact line.
#[derive(Debug, Clone, PartialEq)]
pub struct FactLine {
    /// 1-based line number in the file.
    pub line_no: usize,
    /// Grain cell id.
    pub id: ChunkId,
    pub measures: Vec<f64>,
}

#[derive(Debug, Clone)]
enum FactSource {
    Path(PathBuf),
    Text(Arc<str>),
}

/// Handle to a fact file. Every scan re-reads the source from the start.
#[derive(Debug, Clone)]
pub struct FactFile {
    source: FactSource,
    num_dims: usize,
    num_measures: usize,
    grain_depth: usize,
}

impl FactFile {
    /// Opens the fact file at `path` for `cube`.
    pub fn open(path: &Path, cube: &CubeInfo) -> Result<Self> {
        if !path.is_file() {
            return Err(CubeError::FactFile {
                line: 0,
                reason: format!("{} is not a readable file", path.display()),
            });
        }
        Ok(Self::with_source(FactSource::Path(path.to_path_buf()), cube))
    }

    /// Wraps in-memory fact text for `cube`.
    pub fn from_text(text: &str, cube: &CubeInfo) -> Self {
        Self::with_source(FactSource::Text(Arc::from(text)), cube)
    }

    fn with_source(source: FactSource, cube: &CubeInfo) -> Self {
        Self {
            source,
            num_dims: cube.num_dims(),
            num_measures: cube.num_measures(),
            grain_depth: cube.grain_depth(),
        }
    }

    fn reader(&self) -> Result<Box<dyn BufRead + '_>> {
        Ok(match &self.source {
            FactSource::Path(path) => Box::new(BufReader::new(File::open(path)?)),
            FactSource::Text(text) => Box::new(Cursor::new(text.as_bytes())),
        })
    }

    /// Calls `visit` for every line whose id starts with `prefix`, in file
    /// order, and returns the number of matches. Scanning stops after the
    /// contiguous run of matches ends. Fails with a schema error when a
    /// scanned line sorts before the line above it.
    pub fn scan_prefix<F>(&self, prefix: &ChunkId, mut visit: F) -> Result<usize>
    where
        F: FnMut(FactLine) -> Result<()>,
    {
        let mut matches = 0;
        let mut in_values = false;
        let mut prev: Option<ChunkId> = None;
        for (index, line) in self.reader()?.lines().enumerate() {
            let line_no = index + 1;
            let line = line?;
            let text = line.trim();
            if !in_values {
                in_values = text == VALUES_START;
                continue;
            }
            if text == VALUES_END {
                return Ok(matches);
            }
            if text.is_empty() {
                continue;
            }

            let mut tokens = text.split_whitespace();
            let id = self.parse_id(tokens.next().unwrap_or_default(), line_no)?;
            if let Some(prev) = prev.as_ref().filter(|prev| id < **prev) {
                return Err(CubeError::Schema(format!(
                    "fact file not sorted at line {}: {} follows {}",
                    line_no, id, prev
                )));
            }
            prev = Some(id.clone());
            if !prefix.is_prefix_of(&id) {
                if matches > 0 {
                    trace!(prefix = %prefix, matches, line_no, "Prefix run ended");
                    return Ok(matches);
                }
                continue;
            }
            let measures = self.parse_measures(tokens, line_no)?;
            matches += 1;
            visit(FactLine {
                line_no,
                id,
                measures,
            })?;
        }

        let reason = if in_values {
            format!("missing {} marker", VALUES_END)
        } else {
            format!("missing {} marker", VALUES_START)
        };
        Err(CubeError::FactFile { line: 0, reason })
    }

    /// Collects every line under `prefix`.
    pub fn lines_under(&self, prefix: &ChunkId) -> Result<Vec<FactLine>> {
        let mut lines = Vec::new();
        self.scan_prefix(prefix, |line| {
            lines.push(line);
            Ok(())
        })?;
        Ok(lines)
    }

    fn parse_id(&self, token: &str, line_no: usize) -> Result<ChunkId> {
        let id = ChunkId::parse_with_dims(token, self.num_dims).map_err(|e| CubeError::FactFile {
            line: line_no,
            reason: e.to_string(),
        })?;
        if id.depth() != self.grain_depth {
            return Err(CubeError::FactFile {
                line: line_no,
                reason: format!(
                    "cell {} has {} domains, grain cells have {}",
                    id,
                    id.depth(),
                    self.grain_depth
                ),
            });
        }
        Ok(id)
    }

    fn parse_measures<'t>(
        &self,
        tokens: impl Iterator<Item = &'t str>,
        line_no: usize,
    ) -> Result<Vec<f64>> {
        let measures = tokens
            .map(|token| {
                token.parse::<f64>().map_err(|_| CubeError::FactFile {
                    line: line_no,
                    reason: format!("invalid measure value '{}'", token),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        if measures.len() != self.num_measures {
            return Err(CubeError::FactFile {
                line: line_no,
                reason: format!(
                    "expected {} measures, found {}",
                    self.num_measures,
                    measures.len()
                ),
            });
        }
        Ok(measures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Dimension;
    use std::io::Write;

    fn create_test_cube() -> CubeInfo {
        CubeInfo::new(
            "facts",
            vec![Dimension::balanced("a", &[2, 2]), Dimension::balanced("b", &[1, 2])],
            vec!["m".to_string()],
        )
    }

    const FACTS: &str = "\
header noise
VALUES_START
0|0.0|0 1.0
0|0.1|1 2.0
1|0.2|0 3.0
1|0.3|1 4.0
VALUES_END
trailing noise
";

    #[test]
    fn test_scan_prefix_matches_run() {
        let cube = create_test_cube();
        let facts = FactFile::from_text(FACTS, &cube);

        let lines = facts.lines_under(&"1|0".parse().unwrap()).unwrap();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].line_no, 5);
        assert_eq!(lines[1].measures, vec![4.0]);

        assert_eq!(facts.lines_under(&ChunkId::root()).unwrap().len(), 4);
        assert_eq!(facts.lines_under(&"0|0.1|1".parse().unwrap()).unwrap().len(), 1);
    }

    #[test]
    fn test_scan_prefix_no_match() {
        let cube = create_test_cube();
        let facts = FactFile::from_text(FACTS, &cube);
        assert_eq!(facts.scan_prefix(&"1|0.0|0".parse().unwrap(), |_| Ok(())).unwrap(), 0);
    }

    #[test]
    fn test_missing_markers() {
        let cube = create_test_cube();
        let no_start = FactFile::from_text("0|0.0|0 1.0\n", &cube);
        assert!(matches!(
            no_start.lines_under(&ChunkId::root()),
            Err(CubeError::FactFile { line: 0, .. })
        ));

        let no_end = FactFile::from_text("VALUES_START\n0|0.0|0 1.0\n", &cube);
        assert!(no_end.lines_under(&ChunkId::root()).is_err());
    }

    #[test]
    fn test_bad_lines() {
        let cube = create_test_cube();
        let wrong_count = FactFile::from_text("VALUES_START\n0|0.0|0 1.0 2.0\nVALUES_END\n", &cube);
        assert!(matches!(
            wrong_count.lines_under(&ChunkId::root()),
            Err(CubeError::FactFile { line: 2, .. })
        ));

        let shallow = FactFile::from_text("VALUES_START\n0|0 1.0\nVALUES_END\n", &cube);
        assert!(matches!(
            shallow.lines_under(&ChunkId::root()),
            Err(CubeError::FactFile { line: 2, .. })
        ));

        let bad_value = FactFile::from_text("VALUES_START\n0|0.0|0 x\nVALUES_END\n", &cube);
        assert!(bad_value.lines_under(&ChunkId::root()).is_err());
    }

    #[test]
    fn test_unsorted_lines_rejected() {
        let cube = create_test_cube();
        let facts = FactFile::from_text(
            "VALUES_START\n0|0.0|0 1.0\n0|0.1|1 2.0\n0|0.0|1 3.0\nVALUES_END\n",
            &cube,
        );

        let err = facts.lines_under(&ChunkId::root()).unwrap_err();
        assert!(matches!(&err, CubeError::Schema(msg) if msg.contains("line 4")));

        // The run under 0|0.0|0 ends before the out-of-order line.
        assert_eq!(facts.lines_under(&"0|0.0|0".parse().unwrap()).unwrap().len(), 1);
    }

    #[test]
    fn test_equal_ids_pass_ordering_check() {
        let cube = create_test_cube();
        let facts = FactFile::from_text(
            "VALUES_START\n0|0.0|0 1.0\n0|0.0|0 2.0\nVALUES_END\n",
            &cube,
        );
        assert_eq!(facts.lines_under(&ChunkId::root()).unwrap().len(), 2);
    }

    #[test]
    fn test_open_from_path() {
        let cube = create_test_cube();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(FACTS.as_bytes())
            .unwrap();

        let facts = FactFile::open(&path, &cube).unwrap();
        assert_eq!(facts.lines_under(&"0|0".parse().unwrap()).unwrap().len(), 2);
        assert!(FactFile::open(&dir.path().join("missing.txt"), &cube).is_err());
    }
}
