//! malloclab trace format.
//!
//! ```text
//! <suggested_heap_size>
//! <num_ids>
//! <num_ops>
//! <weight>
//! a <id> <size>
//! f <id>
//! r <id> <size>
//! ```
//!
//! Header values may share lines; blank lines are ignored.

use std::path::Path;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("trace header is missing `{field}`")]
    MissingHeader { field: &'static str },
    #[error("line {line}: `{token}` is not a number")]
    BadNumber { line: usize, token: String },
    #[error("line {line}: unknown operation `{op}`")]
    UnknownOp { line: usize, op: String },
    #[error("line {line}: `{op}` expects {expected} operand(s)")]
    Arity {
        line: usize,
        op: char,
        expected: usize,
    },
    #[error("line {line}: id {id} is outside 0..{num_ids}")]
    IdOutOfRange { line: usize, id: usize, num_ids: usize },
    #[error("header declares {declared} operations but the trace has {found}")]
    OpCountMismatch { declared: usize, found: usize },
}

/// One trace operation. Ids name allocation slots, not addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceOp {
    Alloc { id: usize, size: usize },
    Free { id: usize },
    Realloc { id: usize, size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub suggested_heap_size: usize,
    pub num_ids: usize,
    pub num_ops: usize,
    pub weight: usize,
    pub ops: Vec<TraceOp>,
}

impl Trace {
    pub fn from_file(path: &Path) -> Result<Self, TraceError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, TraceError> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty());

        let mut header = [0usize; 4];
        let names = ["suggested_heap_size", "num_ids", "num_ops", "weight"];
        let mut filled = 0;
        while filled < header.len() {
            let Some((line, text)) = lines.next() else {
                return Err(TraceError::MissingHeader {
                    field: names[filled],
                });
            };
            for token in text.split_whitespace() {
                if filled == header.len() {
                    return Err(TraceError::UnknownOp {
                        line,
                        op: token.to_string(),
                    });
                }
                header[filled] = number(line, token)?;
                filled += 1;
            }
        }
        let [suggested_heap_size, num_ids, num_ops, weight] = header;

        let mut ops = Vec::with_capacity(num_ops);
        for (line, text) in lines {
            let mut tokens = text.split_whitespace();
            let Some(op) = tokens.next() else { continue };
            let operands: Vec<&str> = tokens.collect();
            let (kind, expected) = match op {
                "a" => ('a', 2),
                "f" => ('f', 1),
                "r" => ('r', 2),
                _ => {
                    return Err(TraceError::UnknownOp {
                        line,
                        op: op.to_string(),
                    });
                }
            };
            if operands.len() != expected {
                return Err(TraceError::Arity {
                    line,
                    op: kind,
                    expected,
                });
            }
            let id = number(line, operands[0])?;
            if id >= num_ids {
                return Err(TraceError::IdOutOfRange { line, id, num_ids });
            }
            ops.push(match kind {
                'a' => TraceOp::Alloc {
                    id,
                    size: number(line, operands[1])?,
                },
                'r' => TraceOp::Realloc {
                    id,
                    size: number(line, operands[1])?,
                },
                _ => TraceOp::Free { id },
            });
        }

        if ops.len() != num_ops {
            return Err(TraceError::OpCountMismatch {
                declared: num_ops,
                found: ops.len(),
            });
        }
        Ok(Self {
            suggested_heap_size,
            num_ids,
            num_ops,
            weight,
            ops,
        })
    }
}

fn number(line: usize, token: &str) -> Result<usize, TraceError> {
    token.parse().map_err(|_| TraceError::BadNumber {
        line,
        token: token.to_string(),
    })
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// SHA-256 of raw trace bytes, lowercase hex.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    use sha2::Digest;
    hex_lower(&sha2::Sha256::digest(data))
}
