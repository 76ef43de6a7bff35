//! Kern subsystem - platform services used by the vmap stack manager
//!
//! Counters, time, deferred work and the task list. Each service is a
//! trait with a host implementation.

pub mod counters;
pub mod task;
pub mod timer;
pub mod work;

pub use counters::{StatsSnapshot, VmapCounter, VmapStats};
pub use task::{TaskRegistry, TaskStackInfo, TaskTable};
pub use timer::{Clock, ManualClock, RateLimit, RateVerdict};
pub use work::{ManualScheduler, WorkScheduler};
