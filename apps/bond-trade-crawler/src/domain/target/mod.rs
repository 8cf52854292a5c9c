//! Search Targets
//!
//! A target is one (instrument, date range) search unit. Targets are
//! immutable once built; the registry hands out shared references in
//! round-robin order so fetches never mutate the shared list.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format used by the search endpoint (`MM/DD/YYYY`).
pub const TARGET_DATE_FORMAT: &str = "%m/%d/%Y";

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while constructing targets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    /// Instrument identifier is empty.
    #[error("instrument identifier cannot be empty")]
    EmptyInstrument,

    /// A date is not in `MM/DD/YYYY` form.
    #[error("invalid date '{0}': expected MM/DD/YYYY")]
    InvalidDate(String),

    /// Start date falls after end date.
    #[error("start date {start} is after end date {end}")]
    InvertedRange {
        /// Start of the range.
        start: String,
        /// End of the range.
        end: String,
    },

    /// Registry built from an empty list.
    #[error("target registry requires at least one target")]
    Empty,
}

// =============================================================================
// Target
// =============================================================================

/// One instrument and date range to poll.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Target {
    instrument_id: String,
    start_date: String,
    end_date: String,
}

impl Target {
    /// Create a validated target.
    ///
    /// # Errors
    ///
    /// Returns `TargetError` if the identifier is empty, either date is not
    /// `MM/DD/YYYY`, or the range is inverted.
    pub fn new(
        instrument_id: impl Into<String>,
        start_date: impl Into<String>,
        end_date: impl Into<String>,
    ) -> Result<Self, TargetError> {
        let instrument_id = instrument_id.into().trim().to_string();
        let start_date = start_date.into().trim().to_string();
        let end_date = end_date.into().trim().to_string();

        if instrument_id.is_empty() {
            return Err(TargetError::EmptyInstrument);
        }

        let start = parse_date(&start_date)?;
        let end = parse_date(&end_date)?;
        if start > end {
            return Err(TargetError::InvertedRange {
                start: start_date,
                end: end_date,
            });
        }

        Ok(Self {
            instrument_id,
            start_date,
            end_date,
        })
    }

    /// Instrument identifier (CUSIP-like security id).
    #[must_use]
    pub fn instrument_id(&self) -> &str {
        &self.instrument_id
    }

    /// First trade date of the search window.
    #[must_use]
    pub fn start_date(&self) -> &str {
        &self.start_date
    }

    /// Last trade date of the search window.
    #[must_use]
    pub fn end_date(&self) -> &str {
        &self.end_date
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} - {}]",
            self.instrument_id, self.start_date, self.end_date
        )
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, TargetError> {
    NaiveDate::parse_from_str(value, TARGET_DATE_FORMAT)
        .map_err(|_| TargetError::InvalidDate(value.to_string()))
}

// =============================================================================
// Registry
// =============================================================================

/// Fixed set of targets polled by one supervisor.
///
/// Targets are stored behind `Arc`, so cloning the registry, partitioning it
/// or handing a target to a fetch only copies pointers.
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    targets: Arc<[Arc<Target>]>,
}

impl TargetRegistry {
    /// Build a registry.
    ///
    /// # Errors
    ///
    /// Returns `TargetError::Empty` when no targets are given.
    pub fn new(targets: Vec<Target>) -> Result<Self, TargetError> {
        Self::from_shared(targets.into_iter().map(Arc::new).collect())
    }

    fn from_shared(targets: Vec<Arc<Target>>) -> Result<Self, TargetError> {
        if targets.is_empty() {
            return Err(TargetError::Empty);
        }
        Ok(Self {
            targets: targets.into(),
        })
    }

    /// Target polled on the given tick (wraps around).
    #[must_use]
    pub fn target_for_tick(&self, tick: usize) -> &Arc<Target> {
        &self.targets[tick % self.targets.len()]
    }

    /// Number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Always false; kept for API symmetry with `len`.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Iterate over all targets.
    pub fn iter(&self) -> impl Iterator<Item = &Target> {
        self.targets.iter().map(AsRef::as_ref)
    }

    /// Split targets across `workers` registries, dealing round-robin.
    ///
    /// # Errors
    ///
    /// Returns `TargetError::Empty` if any worker would end up with no
    /// target (more workers than targets, or zero workers).
    pub fn partition(&self, workers: usize) -> Result<Vec<Self>, TargetError> {
        if workers == 0 || workers > self.targets.len() {
            return Err(TargetError::Empty);
        }

        let mut buckets: Vec<Vec<Arc<Target>>> = vec![Vec::new(); workers];
        for (i, target) in self.targets.iter().enumerate() {
            buckets[i % workers].push(Arc::clone(target));
        }

        buckets.into_iter().map(Self::from_shared).collect()
    }
}
