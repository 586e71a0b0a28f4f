use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: &'static str },

    #[error("Index out of bounds: {what} (index={index}, len={len})")]
    IndexOob {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Attribute {attr} holds {actual}, expected {expected}")]
    AttributeType {
        attr: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Attribute lock poisoned: {attr}")]
    Poisoned { attr: String },

    #[error("Invariant violated: {what}")]
    Invariant { what: &'static str },
}
