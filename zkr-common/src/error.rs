use thiserror::Error;

/// Errors raised by the field, curve and key primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("division by zero in the scalar field")]
    DivisionByZero,

    #[error("not a canonical field element: {0}")]
    NonCanonical(String),

    #[error("entropy source failed: {0}")]
    Entropy(String),

    #[error("point is not on the Baby Jubjub curve")]
    NotOnCurve,
}
