use thiserror::Error;

/// Invalid operands to the fixed-point and full-precision math.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("Math error - overflow")]
    Overflow,
    #[error("Math error - underflow")]
    Underflow,
    #[error("Math error - division by zero")]
    DivisionByZero,
    #[error("Math error - square root of a negative value")]
    NegativeSqrt,
    #[error("BitMath error - zero input value")]
    ZeroValue,
}

/// A tick or price outside the protocol bounds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("State error - sqrtPrice out of bounds")]
    SqrtPriceOutOfBounds,
    #[error("State error - sqrtPrice is 0")]
    SqrtPriceIsZero,
    #[error("State error - tick out of bounds")]
    TickOutOfBounds,
    #[error("State error - tick {0} is not aligned to spacing {1}")]
    TickNotAligned(i32, i32),
    #[error("State error - liquidity is 0")]
    LiquidityIsZero,
    #[error("State error - requested amount exceeds curve reserves")]
    InsufficientReserves,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SwapError {
    #[error("Swap error - size is 0")]
    SizeIsZero,
    #[error("Swap error - no initialized tick before the tick bound")]
    SearchExhausted,
    #[error("Swap error - liquidity reached 0 with {0} size remaining")]
    InsufficientLiquidity(alloy_primitives::I256),
}

/// The mirror can no longer be trusted and needs a full resync.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger inconsistency - {0}")]
    Inconsistency(String),
    #[error("Malformed snapshot - {0}")]
    MalformedSnapshot(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Source error - failed to fetch {what}: {reason}")]
    Fetch { what: String, reason: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    MathError(#[from] MathError),

    #[error(transparent)]
    StateError(#[from] StateError),

    #[error(transparent)]
    SwapError(#[from] SwapError),

    #[error(transparent)]
    LedgerError(#[from] LedgerError),

    #[error(transparent)]
    SourceError(#[from] SourceError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shorthand for returning a [`LedgerError::Inconsistency`] from event handlers.
pub(crate) fn inconsistency(msg: impl Into<String>) -> Error {
    let msg = msg.into();
    tracing::warn!(reason = %msg, "ledger inconsistency");
    Error::LedgerError(LedgerError::Inconsistency(msg))
}

pub(crate) fn malformed(msg: impl Into<String>) -> Error {
    Error::LedgerError(LedgerError::MalformedSnapshot(msg.into()))
}
