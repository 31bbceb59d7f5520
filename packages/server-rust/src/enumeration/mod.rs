//! Pagination: enumeration contexts for the Open/Pull/Close operations.

pub mod context;
pub mod sweeper;
pub mod table;

pub use context::{
    ContextId, ContextSettings, ContextStatistics, EnumerationContext, Lifecycle, PullKind,
};
pub use sweeper::{ContextSweeper, SweepTask};
pub use table::{EnumerationTable, SweepReport, TableStatistics};
