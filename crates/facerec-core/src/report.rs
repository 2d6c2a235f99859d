//! Standard output contract for callers that spawn the binary.
//!
//! ```text
//! success
//! [0.0123,-0.0451,...]
//! ```
//!
//! or a single `fail` line when no face was found.

use crate::types::Embedding;
use std::fmt;
use std::io::{self, Write};

pub const SUCCESS_TOKEN: &str = "success";
pub const FAIL_TOKEN: &str = "fail";

/// Outcome of one recognition run, as printed on stdout.
#[derive(Debug, Clone)]
pub enum Report {
    Success(Embedding),
    Fail,
}

impl From<Option<Embedding>> for Report {
    fn from(embedding: Option<Embedding>) -> Self {
        match embedding {
            Some(e) => Report::Success(e),
            None => Report::Fail,
        }
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Report::Success(embedding) => {
                let json = serde_json::to_string(&embedding.values).map_err(|_| fmt::Error)?;
                writeln!(f, "{SUCCESS_TOKEN}")?;
                writeln!(f, "{json}")
            }
            Report::Fail => writeln!(f, "{FAIL_TOKEN}"),
        }
    }
}

impl Report {
    /// Write the report lines, each terminated by `\n`, and flush.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        write!(out, "{self}")?;
        out.flush()
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Report::Success(_))
    }
}
