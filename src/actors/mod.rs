//! Actor-based monitoring engines
//!
//! Each schedule runs as an independent async task driven by Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                        +------------------+
//!                        |    Hub (main)    |
//!                        +--------+---------+
//!                                 | spawns
//!          +----------------------+----------------------+
//!          |                      |                      |
//!  +-------v--------+    +--------v--------+    +--------v--------+
//!  | ScanSchedule   |    | HealthMonitor   |    | Retention       |
//!  | NetworkScanner |    | HealthChecker   |    | (hourly purge)  |
//!  +-------+--------+    +--------+--------+    +-----------------+
//!          |                      |
//!          |              +-------v--------+
//!          |              |  AlertEngine   |
//!          |              +-------+--------+
//!          |                      |
//!          +----------+-----------+
//!                     |
//!           +---------v----------+
//!           | Broadcast Channel  | (MonitorEvent)
//!           +---------+----------+
//!                     | subscribe
//!                push channel, logs, tests
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Engines publish [`messages::MonitorEvent`]s for fan-out
//! 3. **Request/Response**: oneshot channels carry command results back

pub mod alert;
pub mod health;
pub mod messages;
pub mod retention;
pub mod scanner;
