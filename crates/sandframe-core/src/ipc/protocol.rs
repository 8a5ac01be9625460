//! IPC protocol between the host and a sandbox worker.
//!
//! Frames are a 4-byte little-endian length followed by an rkyv archive.
//! Frames from the worker come from a process that ran untrusted code, so
//! they are always validated before use.

use std::io::{ErrorKind, Read, Write};

use rkyv::api::high::HighValidator;
use rkyv::bytecheck::CheckBytes;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};

use crate::config::WorkerOptions;
use crate::dataset::DatasetSnapshot;
use crate::error::{Error, Result};
use crate::result::ExecutionResult;

/// Largest frame either side will read or write.
pub const MAX_FRAME_BYTES: usize = 100 * 1024 * 1024;

/// Command sent from the host to a worker.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum WorkerCommand {
    /// Run `source` against `dataset`.
    Execute {
        source: String,
        dataset: DatasetSnapshot,
        options: WorkerOptions,
    },

    /// Liveness check.
    Ping,

    /// Exit without doing anything further.
    Shutdown,
}

/// Response sent from a worker to the host.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum WorkerResponse {
    /// The classified outcome of an `Execute` command.
    Result(ExecutionResult),

    /// Response to `Ping`.
    Pong,
}

type Serializer<'a> = rkyv::rancor::Strategy<
    rkyv::ser::Serializer<AlignedVec, rkyv::ser::allocator::ArenaHandle<'a>, rkyv::ser::sharing::Share>,
    rkyv::rancor::Error,
>;

/// Archive a message, enforcing the frame limit.
pub fn encode(message: &impl for<'a> Serialize<Serializer<'a>>) -> Result<AlignedVec> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| Error::Serialization(format!("failed to encode IPC message: {}", e)))?;
    if bytes.len() > MAX_FRAME_BYTES {
        return Err(Error::Serialization(format!(
            "IPC message too large: {} bytes (limit {})",
            bytes.len(),
            MAX_FRAME_BYTES
        )));
    }
    Ok(bytes)
}

/// Write one already-encoded frame.
pub fn write_frame<W: Write>(writer: &mut W, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Ipc(format!("IPC frame of {} bytes cannot be length-prefixed", bytes.len())))?;
    writer
        .write_all(&len.to_le_bytes())
        .map_err(|e| Error::Ipc(format!("failed to write IPC message length: {}", e)))?;
    writer
        .write_all(bytes)
        .map_err(|e| Error::Ipc(format!("failed to write IPC message body: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Ipc(format!("failed to flush IPC stream: {}", e)))?;
    Ok(())
}

/// Encode and write a message.
pub fn write_message<W: Write>(
    writer: &mut W,
    message: &impl for<'a> Serialize<Serializer<'a>>,
) -> Result<()> {
    let bytes = encode(message)?;
    write_frame(writer, &bytes)
}

/// Read one frame. `Ok(None)` means the stream ended cleanly before a frame
/// started.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<AlignedVec>> {
    let mut len_bytes = [0u8; 4];
    let mut filled = 0;
    while filled < len_bytes.len() {
        match reader.read(&mut len_bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(Error::Ipc(format!(
                    "stream closed inside a frame header ({} of 4 bytes)",
                    filled
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(Error::Ipc(format!("failed to read IPC message length: {}", e))),
        }
    }

    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(Error::Ipc(format!("IPC message too large: {} bytes", len)));
    }

    let mut bytes = AlignedVec::with_capacity(len);
    bytes.resize(len, 0);
    reader
        .read_exact(&mut bytes)
        .map_err(|e| Error::Ipc(format!("failed to read IPC message body: {}", e)))?;
    Ok(Some(bytes))
}

/// Validate and deserialize a frame body.
pub fn decode<T>(bytes: &[u8]) -> Result<T>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    rkyv::from_bytes::<T, rkyv::rancor::Error>(bytes)
        .map_err(|e| Error::Deserialization(format!("failed to decode IPC message: {}", e)))
}

/// Read and decode one message. A closed stream is an error here.
pub fn read_message<R: Read, T>(reader: &mut R) -> Result<T>
where
    T: Archive,
    T::Archived: for<'a> CheckBytes<HighValidator<'a, rkyv::rancor::Error>>
        + Deserialize<T, rkyv::rancor::Strategy<rkyv::de::Pool, rkyv::rancor::Error>>,
{
    match read_frame(reader)? {
        Some(bytes) => decode(&bytes),
        None => Err(Error::Ipc("stream closed before a message arrived".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{CellValue, ColumnSnapshot};
    use crate::result::{ErrorKind as ResultKind, ScalarValue};
    use std::io::Cursor;

    #[test]
    fn test_execute_command_roundtrip() {
        let dataset = DatasetSnapshot::new(vec![ColumnSnapshot::numeric("x", [1.0, 2.5])]).unwrap();
        let cmd = WorkerCommand::Execute {
            source: "result = df".to_string(),
            dataset: dataset.clone(),
            options: WorkerOptions::default(),
        };

        let mut buf = Vec::new();
        write_message(&mut buf, &cmd).unwrap();

        let decoded: WorkerCommand = read_message(&mut Cursor::new(buf)).unwrap();
        match decoded {
            WorkerCommand::Execute { source, dataset: d, options } => {
                assert_eq!(source, "result = df");
                assert_eq!(d, dataset);
                assert_eq!(d.columns()[0].values()[1], CellValue::Float(2.5));
                assert_eq!(options, WorkerOptions::default());
            }
            other => panic!("wrong command: {:?}", other),
        }
    }

    #[test]
    fn test_result_response_roundtrip() {
        let resp = WorkerResponse::Result(ExecutionResult::Tabular {
            columns: vec!["a".into()],
            rows: vec![vec![CellValue::Timestamp(86_400_000)], vec![CellValue::Null]],
        });
        let mut buf = Vec::new();
        write_message(&mut buf, &resp).unwrap();
        let decoded: WorkerResponse = read_message(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, resp);
    }

    #[test]
    fn test_clean_eof_is_no_frame() {
        assert!(read_frame(&mut Cursor::new(Vec::<u8>::new())).unwrap().is_none());
        let err = read_message::<_, WorkerResponse>(&mut Cursor::new(Vec::<u8>::new())).unwrap_err();
        assert!(matches!(err, Error::Ipc(_)));
    }

    #[test]
    fn test_truncated_frames_are_errors() {
        assert!(read_frame(&mut Cursor::new(vec![5u8, 0])).is_err());

        let mut buf = Vec::new();
        write_message(&mut buf, &WorkerResponse::Pong).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(read_frame(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn test_oversized_length_is_rejected() {
        let len = (MAX_FRAME_BYTES as u32 + 1).to_le_bytes();
        let err = read_frame(&mut Cursor::new(len.to_vec())).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_garbage_fails_validation() {
        let resp = WorkerResponse::Result(ExecutionResult::scalar(ScalarValue::Text("hello".into())));
        let mut bytes = encode(&resp).unwrap();
        for b in bytes.iter_mut() {
            *b = 0xff;
        }
        assert!(matches!(decode::<WorkerResponse>(&bytes), Err(Error::Deserialization(_))));
    }

    #[test]
    fn test_error_result_roundtrip() {
        let resp = WorkerResponse::Result(ExecutionResult::error(ResultKind::RuntimeFault, "boom"));
        let bytes = encode(&resp).unwrap();
        assert_eq!(decode::<WorkerResponse>(&bytes).unwrap(), resp);
    }
}
