//! Memory budget planning.
//!
//! Translates a memory budget given in bytes into the maximum number of records
//! a single in-memory block may hold.

use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// Safety margin callers usually apply to a raw memory budget.
/// It is never applied implicitly, the caller has to pass it to [`MemoryBudget::new`].
pub const DEFAULT_SAFETY_MARGIN: f64 = 0.75;

/// Budget planning error.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetError {
    /// Total memory budget is zero.
    ZeroBudget,
    /// Per-record size estimate is zero.
    ZeroRecordSize,
    /// Safety margin is outside of the `(0, 1]` range.
    InvalidSafetyMargin(f64),
    /// Budget is too small to hold even a single record.
    BlockTooSmall {
        total_bytes: u64,
        record_bytes: u64,
        safety_margin: f64,
    },
    /// Explicitly configured block size is zero.
    ZeroBlockSize,
    /// Neither a memory budget nor a block size was configured.
    Unset,
}

impl Error for BudgetError {}

impl Display for BudgetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetError::ZeroBudget => write!(f, "memory budget must be positive"),
            BudgetError::ZeroRecordSize => write!(f, "record size must be positive"),
            BudgetError::InvalidSafetyMargin(margin) => {
                write!(f, "safety margin {} is out of the (0, 1] range", margin)
            }
            BudgetError::BlockTooSmall {
                total_bytes,
                record_bytes,
                safety_margin,
            } => write!(
                f,
                "budget of {} bytes (safety margin {}) can not hold a single {} byte record",
                total_bytes, safety_margin, record_bytes
            ),
            BudgetError::ZeroBlockSize => write!(f, "block size must be positive"),
            BudgetError::Unset => write!(f, "neither memory budget nor block size is set"),
        }
    }
}

/// Memory budget of a sorting pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudget {
    /// Total bytes that are safe to use for in-memory buffering.
    total_bytes: u64,
    /// Estimated serialized size of a single record including its separator.
    record_bytes: u64,
    /// Fraction of the total budget actually spent on records.
    safety_margin: f64,
}

impl MemoryBudget {
    pub fn new(total_bytes: u64, record_bytes: u64, safety_margin: f64) -> Self {
        MemoryBudget {
            total_bytes,
            record_bytes,
            safety_margin,
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn record_bytes(&self) -> u64 {
        self.record_bytes
    }

    pub fn safety_margin(&self) -> f64 {
        self.safety_margin
    }

    /// Returns the maximum number of records a block may hold under this budget.
    pub fn block_size(&self) -> Result<usize, BudgetError> {
        plan(self.total_bytes, self.record_bytes, self.safety_margin)
    }
}

/// Computes a block size: `floor(safety_margin * total_bytes) / record_bytes`.
///
/// # Arguments
/// * `total_bytes` - Total memory budget
/// * `record_bytes` - Worst-case size of a single record
/// * `safety_margin` - Fraction of the budget to use, must be in `(0, 1]`
pub fn plan(total_bytes: u64, record_bytes: u64, safety_margin: f64) -> Result<usize, BudgetError> {
    if total_bytes == 0 {
        return Err(BudgetError::ZeroBudget);
    }
    if record_bytes == 0 {
        return Err(BudgetError::ZeroRecordSize);
    }
    // written this way so that NaN is rejected too
    if !(safety_margin > 0.0 && safety_margin <= 1.0) {
        return Err(BudgetError::InvalidSafetyMargin(safety_margin));
    }

    let safe_bytes = (total_bytes as f64 * safety_margin).floor() as u64;
    let block_size = safe_bytes / record_bytes;
    if block_size == 0 {
        return Err(BudgetError::BlockTooSmall {
            total_bytes,
            record_bytes,
            safety_margin,
        });
    }

    return Ok(usize::try_from(block_size).unwrap_or(usize::MAX));
}
