//! Execution sandbox for generated data-transformation scripts.
//!
//! This crate provides:
//! - Dataset snapshots and their JSON loader
//! - A restricted script runtime with dataframe, charting and styling support
//! - Classification of script output into a tagged [`ExecutionResult`]
//! - Worker process launch, deadline supervision and IPC framing
//! - A bounded caller-side snapshot store

pub mod chart;
pub mod classify;
pub mod code;
pub mod config;
pub mod dataset;
pub mod error;
pub mod ipc;
pub mod limits;
pub mod render;
pub mod result;
pub mod runtime;
pub mod sandbox;
pub mod script;
pub mod store;

pub use classify::{Capability, ClassifyOptions, classify};
pub use code::CodeUnit;
pub use config::{ChartOutput, SandboxConfig, TimeoutPolicy, WorkerOptions};
pub use dataset::{CellValue, ColumnSnapshot, ColumnType, DatasetSnapshot, DatasetSummary};
pub use error::{Error, Result};
pub use ipc::WorkerState;
pub use result::{ErrorKind, ExecutionResult, ScalarValue};
pub use sandbox::{ExecutionReport, Sandbox};
pub use store::SnapshotStore;
