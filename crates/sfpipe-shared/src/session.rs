//! Request dispatcher
//!
//! A [`ServerSession`] owns both channel ends plus the file mapping and the
//! shared region, and moves through three states:
//!
//! ```text
//! AwaitingConnection ──open()──▶ Serving ──EXIT / channel error / close()──▶ Terminated
//! ```
//!
//! Each served request produces exactly one response, except `EXIT`.
//! Failures of a single request (bad file, bad bounds, missing mapping) are
//! answered with `ERROR` and returned to the caller for reporting; the
//! session keeps serving. Only channel failures end the session.

use crate::format::{FormatError, SfFile};
use crate::mapping::{FileMapping, MappingError, SharedRegion, copy_into_shared};
use crate::messages::{MSG_CONNECT, Request, Response};
use crate::translate::{self, Limits, TranslateError};
use crate::wire::{WireError, write_string};
use crate::{PING_ID, SHARED_MEMORY_NAME, SHARED_MEMORY_SIZE};
use std::io::{Read, Write};
use std::path::Path;
use thiserror::Error;

/// Settings a session is created with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Name of the POSIX shared memory object created by `CREATE_SHM`
    pub shm_name: String,
    /// The only region size `CREATE_SHM` accepts
    pub shm_size: u32,
    /// Number returned with `PONG`
    pub ping_id: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            shm_name: SHARED_MEMORY_NAME.to_string(),
            shm_size: SHARED_MEMORY_SIZE,
            ping_id: PING_ID,
        }
    }
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, `CONNECT` not yet sent
    AwaitingConnection,
    /// Reading and answering requests
    Serving,
    /// Closed; mappings released
    Terminated,
}

/// Failure of a single request; answered with `ERROR`
#[derive(Debug, Error)]
pub enum RequestError {
    /// `CREATE_SHM` asked for a size other than the configured one
    #[error("requested region size {requested} does not match the protocol size {expected}")]
    RegionSize {
        /// Size in the request
        requested: u32,
        /// Configured region size
        expected: u32,
    },

    /// The request needs a shared region and none exists
    #[error("no shared memory region has been created")]
    NoSharedRegion,

    /// The request needs a mapped file and none exists
    #[error("no file has been mapped")]
    NoFileMapped,

    /// Operation name outside the known set
    #[error("unknown operation {0:?}")]
    UnknownOperation(String),

    /// Opening or mapping the file or the region failed
    #[error(transparent)]
    Mapping(#[from] MappingError),

    /// The mapped file is not a valid SF file
    #[error("invalid SF file: {0}")]
    Format(#[from] FormatError),

    /// The requested range cannot be served
    #[error(transparent)]
    Translate(#[from] TranslateError),
}

/// Failure that ends the session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Reading a request or writing a response failed
    #[error(transparent)]
    Channel(#[from] WireError),

    /// The call does not fit the current state
    #[error("session is {actual:?}, expected {expected:?}")]
    InvalidState {
        /// State the session was in
        actual: SessionState,
        /// State the call needs
        expected: SessionState,
    },
}

/// One request and how it went
#[derive(Debug)]
pub struct Served {
    /// The decoded request
    pub request: Request,
    /// `Err` when the request was answered with `ERROR`
    pub outcome: Result<(), RequestError>,
}

impl Served {
    /// True for `EXIT`, after which the session is closed
    pub fn is_exit(&self) -> bool {
        self.request == Request::Exit
    }
}

/// Server side of one client connection
pub struct ServerSession<R, W> {
    reader: R,
    writer: W,
    config: ServerConfig,
    state: SessionState,
    file: Option<FileMapping>,
    region: Option<SharedRegion>,
}

impl<R: Read, W: Write> ServerSession<R, W> {
    /// Session over a request reader and a response writer, not yet opened
    pub fn new(reader: R, writer: W, config: ServerConfig) -> Self {
        Self {
            reader,
            writer,
            config,
            state: SessionState::AwaitingConnection,
            file: None,
            region: None,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Settings the session was created with
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The mapped file, if any
    pub fn file(&self) -> Option<&FileMapping> {
        self.file.as_ref()
    }

    /// The shared region, if any
    pub fn region(&self) -> Option<&SharedRegion> {
        self.region.as_ref()
    }

    /// Greet the client and start serving
    pub fn open(&mut self) -> Result<(), SessionError> {
        self.expect_state(SessionState::AwaitingConnection)?;
        if let Err(e) = self.send_connect() {
            self.close();
            return Err(e.into());
        }
        self.state = SessionState::Serving;
        Ok(())
    }

    /// Read, execute and answer one request
    pub fn serve_one(&mut self) -> Result<Served, SessionError> {
        self.expect_state(SessionState::Serving)?;

        let request = match Request::read_from(&mut self.reader) {
            Ok(request) => request,
            Err(e) => {
                self.close();
                return Err(e.into());
            }
        };

        match self.dispatch(&request) {
            Ok(outcome) => Ok(Served { request, outcome }),
            Err(e) => {
                self.close();
                Err(e.into())
            }
        }
    }

    /// Serve until `EXIT` or a channel failure, reporting each request
    ///
    /// Opens the session first if needed and always leaves it terminated.
    pub fn run<F: FnMut(&Served)>(&mut self, mut on_served: F) -> Result<(), SessionError> {
        if self.state == SessionState::AwaitingConnection {
            self.open()?;
        }

        let result = loop {
            match self.serve_one() {
                Ok(served) => {
                    on_served(&served);
                    if served.is_exit() {
                        break Ok(());
                    }
                }
                Err(e) => break Err(e),
            }
        };

        self.close();
        result
    }

    /// Release both mappings and stop serving
    pub fn close(&mut self) {
        self.file = None;
        self.region = None;
        self.state = SessionState::Terminated;
    }

    /// Tear the session down and hand back the channels
    pub fn into_channels(mut self) -> (R, W) {
        self.close();
        (self.reader, self.writer)
    }

    fn expect_state(&self, expected: SessionState) -> Result<(), SessionError> {
        if self.state != expected {
            return Err(SessionError::InvalidState {
                actual: self.state,
                expected,
            });
        }
        Ok(())
    }

    fn send_connect(&mut self) -> Result<(), WireError> {
        write_string(&mut self.writer, MSG_CONNECT)?;
        self.writer.flush().map_err(WireError::Write)
    }

    /// Execute a request and write its response
    ///
    /// The outer error is a channel failure, the inner one the request's own.
    fn dispatch(&mut self, request: &Request) -> Result<Result<(), RequestError>, WireError> {
        let (response, outcome) = match request {
            Request::Exit => {
                self.close();
                return Ok(Ok(()));
            }
            Request::Ping => (
                Response::Pong {
                    id: self.config.ping_id,
                },
                Ok(()),
            ),
            _ => {
                let outcome = self.execute(request);
                let response = match outcome {
                    Ok(()) => Response::success(request.name_bytes()),
                    Err(_) => Response::error(request.name_bytes()),
                };
                (response, outcome)
            }
        };

        response.write_to(&mut self.writer)?;
        self.writer.flush().map_err(WireError::Write)?;
        Ok(outcome)
    }

    fn execute(&mut self, request: &Request) -> Result<(), RequestError> {
        match request {
            Request::CreateSharedMemory { size } => self.create_shared_memory(*size),
            Request::WriteToSharedMemory { offset, value } => {
                let region = self.region.as_mut().ok_or(RequestError::NoSharedRegion)?;
                Ok(region.write_word(*offset, *value)?)
            }
            Request::MapFile { path } => self.map_file(path),
            Request::ReadFromFileOffset { offset, length } => {
                let (file, region) = self.mappings()?;
                let range = translate::raw_range(*offset, *length, limits(file, region))
                    .map_err(TranslateError::from)?;
                Ok(copy_into_shared(region, file, range)?)
            }
            Request::ReadFromFileSection {
                section,
                offset,
                length,
            } => {
                let (file, region) = self.mappings()?;
                let sf = SfFile::parse(file.bytes())?;
                let range =
                    translate::section_range(&sf, *section, *offset, *length, limits(file, region))?;
                Ok(copy_into_shared(region, file, range)?)
            }
            Request::ReadFromLogicalOffset {
                logical_offset,
                length,
            } => {
                let (file, region) = self.mappings()?;
                let sf = SfFile::parse(file.bytes())?;
                let range =
                    translate::logical_range(&sf, *logical_offset, *length, limits(file, region))?;
                Ok(copy_into_shared(region, file, range)?)
            }
            Request::Unknown { name } => Err(RequestError::UnknownOperation(
                String::from_utf8_lossy(name).into_owned(),
            )),
            Request::Ping | Request::Exit => Ok(()),
        }
    }

    fn create_shared_memory(&mut self, size: u32) -> Result<(), RequestError> {
        if size != self.config.shm_size {
            return Err(RequestError::RegionSize {
                requested: size,
                expected: self.config.shm_size,
            });
        }
        // the old region is unmapped and unlinked before its name is reused
        self.region = None;
        self.region = Some(SharedRegion::create(&self.config.shm_name, size as usize)?);
        Ok(())
    }

    fn map_file(&mut self, path: &Path) -> Result<(), RequestError> {
        self.file = None;
        self.file = Some(FileMapping::open(path)?);
        Ok(())
    }

    fn mappings(&mut self) -> Result<(&FileMapping, &mut SharedRegion), RequestError> {
        let file = self.file.as_ref().ok_or(RequestError::NoFileMapped)?;
        let region = self.region.as_mut().ok_or(RequestError::NoSharedRegion)?;
        Ok((file, region))
    }
}

fn limits(file: &FileMapping, region: &SharedRegion) -> Limits {
    Limits {
        file_size: file.len() as u64,
        region_size: region.len() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn requests(list: &[Request]) -> Cursor<Vec<u8>> {
        let mut stream = Vec::new();
        for request in list {
            request.write_to(&mut stream).unwrap();
        }
        Cursor::new(stream)
    }

    fn session(list: &[Request]) -> ServerSession<Cursor<Vec<u8>>, Vec<u8>> {
        ServerSession::new(requests(list), Vec::new(), ServerConfig::default())
    }

    #[test]
    fn test_open_writes_connect() {
        let mut s = session(&[]);
        assert_eq!(s.state(), SessionState::AwaitingConnection);
        s.open().unwrap();
        assert_eq!(s.state(), SessionState::Serving);

        let (_, out) = s.into_channels();
        assert_eq!(out, b"\x07CONNECT");
    }

    #[test]
    fn test_serve_before_open_is_rejected() {
        let mut s = session(&[Request::Ping]);
        assert!(matches!(
            s.serve_one(),
            Err(SessionError::InvalidState {
                actual: SessionState::AwaitingConnection,
                expected: SessionState::Serving
            })
        ));
    }

    #[test]
    fn test_open_twice_is_rejected() {
        let mut s = session(&[]);
        s.open().unwrap();
        assert!(s.open().is_err());
    }

    #[test]
    fn test_ping() {
        let mut s = session(&[Request::Ping]);
        s.open().unwrap();
        let served = s.serve_one().unwrap();
        assert_eq!(served.request, Request::Ping);
        assert!(served.outcome.is_ok());

        let (_, out) = s.into_channels();
        assert_eq!(&out[8..], b"\x04PING\x04PONG\xd2\xa3\x00\x00");
    }

    #[test]
    fn test_exit_terminates_without_response() {
        let mut s = session(&[Request::Exit, Request::Ping]);
        s.open().unwrap();
        assert!(s.serve_one().unwrap().is_exit());
        assert_eq!(s.state(), SessionState::Terminated);
        assert!(s.serve_one().is_err());

        let (mut input, out) = s.into_channels();
        assert_eq!(out, b"\x07CONNECT");
        // the PING after EXIT is still unread
        assert_eq!(Request::read_from(&mut input).unwrap(), Request::Ping);
    }

    #[test]
    fn test_closed_channel_ends_session() {
        let mut s = session(&[]);
        s.open().unwrap();
        match s.serve_one() {
            Err(SessionError::Channel(e)) => assert!(e.is_closed()),
            other => panic!("expected channel error, got {other:?}"),
        }
        assert_eq!(s.state(), SessionState::Terminated);
    }

    #[test]
    fn test_unknown_operation_gets_error() {
        let mut s = session(&[Request::Unknown {
            name: b"FROB".to_vec(),
        }]);
        s.open().unwrap();
        let served = s.serve_one().unwrap();
        assert!(matches!(
            served.outcome,
            Err(RequestError::UnknownOperation(ref name)) if name == "FROB"
        ));
        assert_eq!(s.state(), SessionState::Serving);

        let (_, out) = s.into_channels();
        assert_eq!(&out[8..], b"\x04FROB\x05ERROR");
    }

    #[test]
    fn test_create_shm_with_wrong_size() {
        let mut s = session(&[Request::CreateSharedMemory { size: 100 }]);
        s.open().unwrap();
        let served = s.serve_one().unwrap();
        assert!(matches!(
            served.outcome,
            Err(RequestError::RegionSize { requested: 100, .. })
        ));
        assert!(s.region().is_none());
    }

    #[test]
    fn test_write_without_region() {
        let mut s = session(&[Request::WriteToSharedMemory {
            offset: 0,
            value: 1,
        }]);
        s.open().unwrap();
        assert!(matches!(
            s.serve_one().unwrap().outcome,
            Err(RequestError::NoSharedRegion)
        ));
    }

    #[test]
    fn test_reads_need_a_mapped_file() {
        let mut s = session(&[
            Request::ReadFromFileOffset {
                offset: 0,
                length: 0,
            },
            Request::ReadFromFileSection {
                section: 1,
                offset: 0,
                length: 0,
            },
            Request::ReadFromLogicalOffset {
                logical_offset: 0,
                length: 0,
            },
        ]);
        s.open().unwrap();
        for _ in 0..3 {
            assert!(matches!(
                s.serve_one().unwrap().outcome,
                Err(RequestError::NoFileMapped)
            ));
        }
    }

    #[test]
    fn test_run_reports_every_request() {
        let mut s = session(&[
            Request::Ping,
            Request::MapFile {
                path: "/nonexistent/sfpipe/file.sf".into(),
            },
            Request::Exit,
        ]);
        let mut seen = Vec::new();
        s.run(|served| seen.push((served.request.name().into_owned(), served.outcome.is_ok())))
            .unwrap();

        assert_eq!(
            seen,
            [
                ("PING".to_string(), true),
                ("MAP_FILE".to_string(), false),
                ("EXIT".to_string(), true)
            ]
        );
        assert_eq!(s.state(), SessionState::Terminated);
    }
}
