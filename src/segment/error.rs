#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("string empty or too long to be numeric")]
    InvalidString,
    #[error("first digit must be 1-9")]
    InvalidFirstDigit,
    #[error("invalid character in numeric string")]
    InvalidChar,
    #[error("multiply overflow")]
    MulOverflow,
    #[error("add overflow")]
    AddOverflow,
    #[error("negative value out of range")]
    NegativeOverflow,
    #[error("positive value out of range")]
    PositiveOverflow,
}
