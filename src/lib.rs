//! A configurable multi-worker SQL load driver: binds freshly generated
//! typed values into a parameterised statement, paces toward a target
//! transaction rate or load percentage, and reports throughput and latency.

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod generator;
pub mod monitor;
pub mod report;
pub mod ring;
pub mod stats;
pub mod template;
pub mod worker;

pub use config::{help_text, Config, Opt, Properties};
pub use data::DataTable;
pub use engine::Engine;
pub use error::{DriverError, Result};
pub use generator::{Value, ValueGenerator};
pub use report::{FinalReport, LogReporter, ProgressReport, Reporter};
pub use ring::RingHistory;
pub use stats::{Snapshot, Stats};
pub use template::{StatementTemplate, Verb};
