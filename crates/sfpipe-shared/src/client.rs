//! Client side of the pipe protocol

use crate::messages::{MSG_CONNECT, Request, Response};
use crate::wire::{WireError, read_string};
use std::io::{Read, Write};
use std::path::Path;

/// Drives a server over a request channel and a response channel
pub struct SfClient<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> SfClient<R, W> {
    /// Wait for the server's `CONNECT` greeting
    pub fn connect(mut reader: R, writer: W) -> Result<Self, WireError> {
        let greeting = read_string(&mut reader)?;
        if greeting != MSG_CONNECT.as_bytes() {
            return Err(WireError::Malformed(format!(
                "expected CONNECT, got {:?}",
                String::from_utf8_lossy(&greeting)
            )));
        }
        Ok(Self { reader, writer })
    }

    /// Send a request and wait for its response; `EXIT` has none
    pub fn call(&mut self, request: &Request) -> Result<Option<Response>, WireError> {
        request.write_to(&mut self.writer)?;
        self.writer.flush().map_err(WireError::Write)?;

        if *request == Request::Exit {
            return Ok(None);
        }

        let response = Response::read_from(&mut self.reader)?;
        if response.name_bytes() != request.name_bytes() {
            return Err(WireError::Malformed(format!(
                "response to {} echoes {:?}",
                request.name(),
                String::from_utf8_lossy(response.name_bytes())
            )));
        }
        Ok(Some(response))
    }

    /// Returns the server's ping id
    pub fn ping(&mut self) -> Result<u32, WireError> {
        match self.call(&Request::Ping)? {
            Some(Response::Pong { id }) => Ok(id),
            other => Err(WireError::Malformed(format!(
                "expected PONG, got {other:?}"
            ))),
        }
    }

    /// `CREATE_SHM` with the given region size
    pub fn create_shm(&mut self, size: u32) -> Result<Response, WireError> {
        self.expect_response(&Request::CreateSharedMemory { size })
    }

    /// `WRITE_TO_SHM`: store `value` at `offset` in the region
    pub fn write_to_shm(&mut self, offset: u32, value: u32) -> Result<Response, WireError> {
        self.expect_response(&Request::WriteToSharedMemory { offset, value })
    }

    /// `MAP_FILE`
    pub fn map_file(&mut self, path: impl AsRef<Path>) -> Result<Response, WireError> {
        self.expect_response(&Request::MapFile {
            path: path.as_ref().to_path_buf(),
        })
    }

    /// `READ_FROM_FILE_OFFSET`
    pub fn read_from_file_offset(&mut self, offset: u32, length: u32) -> Result<Response, WireError> {
        self.expect_response(&Request::ReadFromFileOffset { offset, length })
    }

    /// `READ_FROM_FILE_SECTION` with a 1-based section number
    pub fn read_from_file_section(
        &mut self,
        section: u32,
        offset: u32,
        length: u32,
    ) -> Result<Response, WireError> {
        self.expect_response(&Request::ReadFromFileSection {
            section,
            offset,
            length,
        })
    }

    /// `READ_FROM_LOGICAL_SPACE_OFFSET`
    pub fn read_from_logical_offset(
        &mut self,
        logical_offset: u32,
        length: u32,
    ) -> Result<Response, WireError> {
        self.expect_response(&Request::ReadFromLogicalOffset {
            logical_offset,
            length,
        })
    }

    /// Send `EXIT`; the server answers nothing
    pub fn exit(mut self) -> Result<(), WireError> {
        self.call(&Request::Exit).map(|_| ())
    }

    fn expect_response(&mut self, request: &Request) -> Result<Response, WireError> {
        self.call(request)?
            .ok_or_else(|| WireError::Malformed(format!("no response to {}", request.name())))
    }
}
