//! Plain-text graph descriptions
//!
//! ```text
//! 6 6
//! 1 0 0 0 0 1
//! 1 1 0 0 0 0
//! 0 1 1 0 0 0
//! 0 0 1 1 0 0
//! 0 0 0 1 1 0
//! 0 0 0 0 1 1
//! 1 1 1 1 1 1
//! ```
//!
//! The first line holds the vertex and edge counts, followed by one incidence row
//! per vertex and a final line of edge weights. Only blank lines may follow.

use std::path::Path;

use thiserror::Error;

use super::{Graph, MIN_EDGES, MIN_VERTICES};

/// Errors raised while reading a graph description
#[derive(Error, Debug)]
pub enum TextFormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing graph dimensions")]
    MissingDimensions,

    #[error("Line {line}: {message}")]
    Line { line: usize, message: String },

    #[error("Unexpected data after the weight list (line {0})")]
    TrailingData(usize),
}

fn line_error(line: usize, message: impl Into<String>) -> TextFormatError {
    TextFormatError::Line {
        line,
        message: message.into(),
    }
}

fn parse_count(token: Option<&str>, what: &str, min: u16) -> Result<u16, TextFormatError> {
    let token = token.ok_or_else(|| line_error(1, format!("missing {} count", what)))?;
    let value: u32 = token
        .parse()
        .map_err(|_| line_error(1, format!("invalid {} count '{}'", what, token)))?;
    if value < min as u32 || value > u16::MAX as u32 {
        return Err(line_error(
            1,
            format!("{} count {} must be between {} and {}", what, value, min, u16::MAX),
        ));
    }
    Ok(value as u16)
}

/// Parse a graph description
pub fn parse_graph(input: &str) -> Result<Graph, TextFormatError> {
    let mut lines = input.lines().enumerate().map(|(i, l)| (i + 1, l));

    let (_, first) = lines.next().ok_or(TextFormatError::MissingDimensions)?;
    let mut tokens = first.split_whitespace();
    let vertices = parse_count(tokens.next(), "vertex", MIN_VERTICES)?;
    let edges = parse_count(tokens.next(), "edge", MIN_EDGES)?;
    if tokens.next().is_some() {
        return Err(line_error(1, "expected exactly two numbers"));
    }

    let mut incidence = Vec::with_capacity(vertices as usize);
    for v in 0..vertices {
        let (line_no, line) = lines
            .next()
            .ok_or_else(|| line_error(v as usize + 2, "missing incidence row"))?;
        let row = line
            .split_whitespace()
            .map(|token| match token {
                "0" => Ok(0u8),
                "1" => Ok(1u8),
                other => Err(line_error(
                    line_no,
                    format!("incidence values must be 0 or 1, got '{}'", other),
                )),
            })
            .collect::<Result<Vec<u8>, _>>()?;
        if row.len() != edges as usize {
            return Err(line_error(
                line_no,
                format!("expected {} incidence values, got {}", edges, row.len()),
            ));
        }
        incidence.push(row);
    }

    let weights_line_no = vertices as usize + 2;
    let (line_no, line) = lines
        .next()
        .ok_or_else(|| line_error(weights_line_no, "missing weight list"))?;
    let weights = line
        .split_whitespace()
        .map(|token| {
            token
                .parse::<u32>()
                .map_err(|_| line_error(line_no, format!("invalid weight '{}'", token)))
        })
        .collect::<Result<Vec<u32>, _>>()?;
    if weights.len() != edges as usize {
        return Err(line_error(
            line_no,
            format!("expected {} weights, got {}", edges, weights.len()),
        ));
    }

    if let Some((line_no, _)) = lines.find(|(_, l)| !l.trim().is_empty()) {
        return Err(TextFormatError::TrailingData(line_no));
    }

    Ok(Graph::new(vertices, edges, incidence, weights))
}

/// Read and parse a graph description file
pub fn load_graph(path: &Path) -> Result<Graph, TextFormatError> {
    let contents = std::fs::read_to_string(path)?;
    parse_graph(&contents)
}
