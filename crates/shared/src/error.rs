use thiserror::Error;

/// An integer column held a value that maps to no variant of the target enum.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} code: {code}")]
pub struct CodeError {
    pub kind: &'static str,
    pub code: i64,
}

impl CodeError {
    pub fn new(kind: &'static str, code: i64) -> Self {
        Self { kind, code }
    }
}
