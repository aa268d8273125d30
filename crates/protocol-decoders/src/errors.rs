use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RMonitorError {
    #[error("line does not start with '$'")]
    MissingSigil,
    #[error("unknown record code {0:?}")]
    UnknownCode(String),
    #[error("record {code:?} expected at least {expected} fields, got {got}")]
    TooFewFields {
        code: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid numeric field {0:?}")]
    InvalidNumber(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MultiloopError {
    #[error("line does not start with '$'")]
    MissingSigil,
    #[error("malformed header: {0:?}")]
    MalformedHeader(String),
    #[error("unknown record type {0:?}")]
    UnknownRecordType(String),
    #[error("record {record_type:?} expected at least {expected} fields, got {got}")]
    TooFewFields {
        record_type: String,
        expected: usize,
        got: usize,
    },
    #[error("invalid hex field {0:?}")]
    InvalidHex(String),
}
