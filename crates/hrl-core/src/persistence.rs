//! Plain-text matrix persistence for decoders and encoders.
//!
//! One row per line, values separated by whitespace. Loading checks the
//! shape against the model and never reshapes.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::{debug, info};

use crate::{RLError, Result};

/// File names used for one agent checkpoint under a common prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    /// Decoders of the current-state value store
    pub state_decoders: PathBuf,
    /// Decoders of the saved-state value store
    pub old_state_decoders: PathBuf,
    /// Encoders shared by both stores
    pub state_encoders: PathBuf,
}

impl CheckpointPaths {
    /// Paths for `prefix`, e.g. `weights/nav_0` gives
    /// `weights/nav_0_state_decoders.txt` and friends
    pub fn new(prefix: impl AsRef<Path>) -> Self {
        let prefix = prefix.as_ref();
        let with = |suffix: &str| {
            let mut name = prefix.as_os_str().to_owned();
            name.push(suffix);
            PathBuf::from(name)
        };
        Self {
            state_decoders: with("_state_decoders.txt"),
            old_state_decoders: with("_old_state_decoders.txt"),
            state_encoders: with("_state_encoders.txt"),
        }
    }
}

/// Render a matrix in the text format
#[must_use]
pub fn format_matrix(matrix: &Array2<f64>) -> String {
    let mut out = String::new();
    for (i, row) in matrix.rows().into_iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        for (j, v) in row.iter().enumerate() {
            if j > 0 {
                out.push(' ');
            }
            // {:?} keeps full precision for round-tripping
            let _ = write!(out, "{v:?}");
        }
    }
    out
}

/// Parse the text format. `path` is only used for error reporting.
pub fn parse_matrix(text: &str, path: &Path) -> Result<Array2<f64>> {
    let mut rows: Vec<Vec<f64>> = Vec::new();

    for (i, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|token| {
                token.parse::<f64>().map_err(|_| RLError::MalformedData {
                    path: path.to_path_buf(),
                    line: i + 1,
                    reason: format!("non-numeric token '{token}'"),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if let Some(first) = rows.first() {
            if first.len() != row.len() {
                return Err(RLError::MalformedData {
                    path: path.to_path_buf(),
                    line: i + 1,
                    reason: format!("expected {} values, found {}", first.len(), row.len()),
                });
            }
        }
        rows.push(row);
    }

    let cols = rows.first().map_or(0, Vec::len);
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), cols), flat)
        .map_err(|e| RLError::Other(anyhow::anyhow!("failed to assemble matrix: {e}")))
}

/// Write `matrix` to `path`, creating parent directories as needed
pub fn save_matrix(path: &Path, matrix: &Array2<f64>) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, format_matrix(matrix))?;
    debug!(path = %path.display(), rows = matrix.nrows(), cols = matrix.ncols(), "saved matrix");
    Ok(())
}

/// Read a matrix from `path` and check it is `expected` = (rows, cols)
pub fn load_matrix(path: &Path, expected: (usize, usize)) -> Result<Array2<f64>> {
    let text = std::fs::read_to_string(path)?;
    let matrix = parse_matrix(&text, path)?;

    if matrix.dim() != expected {
        return Err(RLError::ConfigMismatch {
            path: path.to_path_buf(),
            expected_rows: expected.0,
            expected_cols: expected.1,
            rows: matrix.nrows(),
            cols: matrix.ncols(),
        });
    }

    info!(path = %path.display(), rows = expected.0, cols = expected.1, "loaded matrix");
    Ok(matrix)
}
