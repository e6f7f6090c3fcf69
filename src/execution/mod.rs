// Position lifecycle: reconciliation against the venue and post-close order cleanup
pub mod order_cleanup;
pub mod position_monitor;

pub use order_cleanup::{CleanupMode, CleanupReport, OrderCleanupService};
pub use position_monitor::{CycleReport, PositionMonitor};
