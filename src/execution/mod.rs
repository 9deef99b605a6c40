// Order execution and position lifecycle module
pub mod adapter;
pub mod exit_monitor;
pub mod position_manager;

pub use adapter::{ExecutionAdapter, ExecutionError, PaperExecutionAdapter};
pub use exit_monitor::{AlertPriority, ExitAlert, ExitMonitor, ExitMonitorConfig};
pub use position_manager::{InvalidCloseError, PositionManager};
