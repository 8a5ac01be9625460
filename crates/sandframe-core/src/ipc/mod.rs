//! Inter-process communication with sandbox worker processes.
//!
//! The host writes one [`WorkerCommand`] to a worker's stdin and reads one
//! [`WorkerResponse`] from its stdout.

pub mod protocol;
mod worker;

pub use protocol::{
    MAX_FRAME_BYTES, WorkerCommand, WorkerResponse, decode, encode, read_frame, read_message,
    write_frame, write_message,
};
pub use worker::{
    WORKER_BINARY, WORKER_LOG_ENV, WorkerProcess, WorkerState, describe_exit, find_worker_binary,
};
