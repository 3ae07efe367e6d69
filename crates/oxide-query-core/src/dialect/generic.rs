//! Generic SQL dialect.

use super::{Dialect, OffsetStrategy};

/// A generic SQL dialect using ANSI SQL standards.
///
/// Offsets use a `ROW_NUMBER()` window unless another strategy is chosen.
#[derive(Debug, Clone, Copy)]
pub struct GenericDialect {
    offset: OffsetStrategy,
}

impl Default for GenericDialect {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericDialect {
    /// Creates a new generic dialect.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            offset: OffsetStrategy::RowNumber,
        }
    }

    /// Overrides the offset strategy.
    #[must_use]
    pub const fn with_offset_strategy(mut self, offset: OffsetStrategy) -> Self {
        self.offset = offset;
        self
    }
}

impl Dialect for GenericDialect {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn offset_strategy(&self) -> OffsetStrategy {
        self.offset
    }
}
