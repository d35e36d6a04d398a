//! Request and response messages
//!
//! Every message starts with the operation name as a string field. Requests
//! continue with the operation's parameters; responses echo the name, then a
//! status string, then any success payload:
//! ```text
//! request:   │ name │ params...                │
//! response:  │ name │ "SUCCESS" | "ERROR"      │
//! ping:      │ "PING" │ "PONG" │ id: u32       │
//! ```
//!
//! | operation                        | request fields              |
//! |----------------------------------|-----------------------------|
//! | `PING`                           | none                        |
//! | `CREATE_SHM`                     | size                        |
//! | `WRITE_TO_SHM`                   | offset, value               |
//! | `MAP_FILE`                       | path (string)               |
//! | `READ_FROM_FILE_OFFSET`          | offset, length              |
//! | `READ_FROM_FILE_SECTION`         | section, offset, length     |
//! | `READ_FROM_LOGICAL_SPACE_OFFSET` | logical offset, length      |
//! | `EXIT`                           | none                        |
//!
//! `EXIT` gets no response.

use crate::wire::{WireError, read_string, read_u32, write_string, write_u32};
use std::borrow::Cow;
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// Greeting written once the channels are open
pub const MSG_CONNECT: &str = "CONNECT";
/// Status tag of a request that was carried out
pub const MSG_SUCCESS: &str = "SUCCESS";
/// Status tag of a request that failed
pub const MSG_ERROR: &str = "ERROR";
/// Second field of the answer to `PING`
pub const MSG_PONG: &str = "PONG";

/// Known operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `PING`
    Ping,
    /// `CREATE_SHM`
    CreateShm,
    /// `WRITE_TO_SHM`
    WriteToShm,
    /// `MAP_FILE`
    MapFile,
    /// `READ_FROM_FILE_OFFSET`
    ReadFromFileOffset,
    /// `READ_FROM_FILE_SECTION`
    ReadFromFileSection,
    /// `READ_FROM_LOGICAL_SPACE_OFFSET`
    ReadFromLogicalOffset,
    /// `EXIT`
    Exit,
}

impl Opcode {
    /// Every known operation, in protocol order
    pub const ALL: [Opcode; 8] = [
        Opcode::Ping,
        Opcode::CreateShm,
        Opcode::WriteToShm,
        Opcode::MapFile,
        Opcode::ReadFromFileOffset,
        Opcode::ReadFromFileSection,
        Opcode::ReadFromLogicalOffset,
        Opcode::Exit,
    ];

    /// Name as it travels on the wire
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Ping => "PING",
            Opcode::CreateShm => "CREATE_SHM",
            Opcode::WriteToShm => "WRITE_TO_SHM",
            Opcode::MapFile => "MAP_FILE",
            Opcode::ReadFromFileOffset => "READ_FROM_FILE_OFFSET",
            Opcode::ReadFromFileSection => "READ_FROM_FILE_SECTION",
            Opcode::ReadFromLogicalOffset => "READ_FROM_LOGICAL_SPACE_OFFSET",
            Opcode::Exit => "EXIT",
        }
    }

    /// Exact match against the known names
    pub fn from_name(name: &[u8]) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.name().as_bytes() == name)
    }
}

/// A decoded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Liveness check, answered with the ping id
    Ping,
    /// Create the shared region
    CreateSharedMemory {
        /// Requested size; must equal the configured region size
        size: u32,
    },
    /// Store one word in the shared region
    WriteToSharedMemory {
        /// Byte offset inside the region
        offset: u32,
        /// Value stored little-endian
        value: u32,
    },
    /// Map a file read-only
    MapFile {
        /// Path of the file to serve
        path: PathBuf,
    },
    /// Copy bytes at a raw file offset into the region
    ReadFromFileOffset {
        /// Byte offset in the file
        offset: u32,
        /// Number of bytes
        length: u32,
    },
    /// Copy bytes of one section into the region
    ReadFromFileSection {
        /// 1-based section number
        section: u32,
        /// Byte offset inside the section
        offset: u32,
        /// Number of bytes
        length: u32,
    },
    /// Copy bytes at a logical offset into the region
    ReadFromLogicalOffset {
        /// Offset in the page-rounded logical space
        logical_offset: u32,
        /// Number of bytes
        length: u32,
    },
    /// End the session; gets no response
    Exit,
    /// Name outside the known set; its parameters, if any, are not consumed
    Unknown {
        /// Name as received
        name: Vec<u8>,
    },
}

impl Request {
    /// Operation of the request, `None` for unknown names
    pub fn opcode(&self) -> Option<Opcode> {
        Some(match self {
            Request::Ping => Opcode::Ping,
            Request::CreateSharedMemory { .. } => Opcode::CreateShm,
            Request::WriteToSharedMemory { .. } => Opcode::WriteToShm,
            Request::MapFile { .. } => Opcode::MapFile,
            Request::ReadFromFileOffset { .. } => Opcode::ReadFromFileOffset,
            Request::ReadFromFileSection { .. } => Opcode::ReadFromFileSection,
            Request::ReadFromLogicalOffset { .. } => Opcode::ReadFromLogicalOffset,
            Request::Exit => Opcode::Exit,
            Request::Unknown { .. } => return None,
        })
    }

    /// Wire name of the request
    pub fn name_bytes(&self) -> &[u8] {
        match self {
            Request::Unknown { name } => name,
            _ => self.opcode().map(Opcode::name).unwrap_or_default().as_bytes(),
        }
    }

    /// Wire name for display
    pub fn name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.name_bytes())
    }

    /// Decode the next request from the channel
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, WireError> {
        let name = read_string(r)?;
        let Some(op) = Opcode::from_name(&name) else {
            return Ok(Request::Unknown { name });
        };

        Ok(match op {
            Opcode::Ping => Request::Ping,
            Opcode::CreateShm => Request::CreateSharedMemory { size: read_u32(r)? },
            Opcode::WriteToShm => Request::WriteToSharedMemory {
                offset: read_u32(r)?,
                value: read_u32(r)?,
            },
            Opcode::MapFile => Request::MapFile {
                path: PathBuf::from(OsStr::from_bytes(&read_string(r)?)),
            },
            Opcode::ReadFromFileOffset => Request::ReadFromFileOffset {
                offset: read_u32(r)?,
                length: read_u32(r)?,
            },
            Opcode::ReadFromFileSection => Request::ReadFromFileSection {
                section: read_u32(r)?,
                offset: read_u32(r)?,
                length: read_u32(r)?,
            },
            Opcode::ReadFromLogicalOffset => Request::ReadFromLogicalOffset {
                logical_offset: read_u32(r)?,
                length: read_u32(r)?,
            },
            Opcode::Exit => Request::Exit,
        })
    }

    /// Encode the request onto the channel
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), WireError> {
        write_string(w, self.name_bytes())?;
        match self {
            Request::Ping | Request::Exit | Request::Unknown { .. } => {}
            Request::CreateSharedMemory { size } => write_u32(w, *size)?,
            Request::WriteToSharedMemory { offset, value } => {
                write_u32(w, *offset)?;
                write_u32(w, *value)?;
            }
            Request::MapFile { path } => write_string(w, path_bytes(path))?,
            Request::ReadFromFileOffset { offset, length } => {
                write_u32(w, *offset)?;
                write_u32(w, *length)?;
            }
            Request::ReadFromFileSection {
                section,
                offset,
                length,
            } => {
                write_u32(w, *section)?;
                write_u32(w, *offset)?;
                write_u32(w, *length)?;
            }
            Request::ReadFromLogicalOffset {
                logical_offset,
                length,
            } => {
                write_u32(w, *logical_offset)?;
                write_u32(w, *length)?;
            }
        }
        Ok(())
    }
}

fn path_bytes(path: &Path) -> &[u8] {
    path.as_os_str().as_bytes()
}

/// Outcome tag of a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `SUCCESS`
    Success,
    /// `ERROR`
    Error,
}

impl Status {
    /// Tag as it travels on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Success => MSG_SUCCESS,
            Status::Error => MSG_ERROR,
        }
    }
}

/// A response as written by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Answer to `PING`
    Pong {
        /// Server's ping id
        id: u32,
    },
    /// Echoed operation name and status
    Status {
        /// Name of the request being answered
        name: Vec<u8>,
        /// Outcome of the request
        status: Status,
    },
}

impl Response {
    /// `SUCCESS` answer to the request called `name`
    pub fn success(name: &[u8]) -> Self {
        Response::Status {
            name: name.to_vec(),
            status: Status::Success,
        }
    }

    /// `ERROR` answer to the request called `name`
    pub fn error(name: &[u8]) -> Self {
        Response::Status {
            name: name.to_vec(),
            status: Status::Error,
        }
    }

    /// Echoed request name
    pub fn name_bytes(&self) -> &[u8] {
        match self {
            Response::Pong { .. } => Opcode::Ping.name().as_bytes(),
            Response::Status { name, .. } => name,
        }
    }

    /// Status of the response; a pong counts as success
    pub fn status(&self) -> Status {
        match self {
            Response::Pong { .. } => Status::Success,
            Response::Status { status, .. } => *status,
        }
    }

    /// Shorthand for `status() == Status::Success`
    pub fn is_success(&self) -> bool {
        self.status() == Status::Success
    }

    /// Encode the response onto the channel
    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> Result<(), WireError> {
        match self {
            Response::Pong { id } => {
                write_string(w, Opcode::Ping.name())?;
                write_string(w, MSG_PONG)?;
                write_u32(w, *id)
            }
            Response::Status { name, status } => {
                write_string(w, name)?;
                write_string(w, status.as_str())
            }
        }
    }

    /// Decode the next response from the channel
    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> Result<Self, WireError> {
        let name = read_string(r)?;
        let tag = read_string(r)?;

        if tag == MSG_PONG.as_bytes() {
            return Ok(Response::Pong { id: read_u32(r)? });
        }

        let status = if tag == MSG_SUCCESS.as_bytes() {
            Status::Success
        } else if tag == MSG_ERROR.as_bytes() {
            Status::Error
        } else {
            return Err(WireError::Malformed(format!(
                "unknown status {:?} for {:?}",
                String::from_utf8_lossy(&tag),
                String::from_utf8_lossy(&name)
            )));
        };

        Ok(Response::Status { name, status })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encode(request: &Request) -> Vec<u8> {
        let mut out = Vec::new();
        request.write_to(&mut out).unwrap();
        out
    }

    #[test]
    fn test_opcode_names_are_exact() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::from_name(op.name().as_bytes()), Some(op));
        }
        assert_eq!(Opcode::from_name(b"PIN"), None);
        assert_eq!(Opcode::from_name(b"PINGX"), None);
        assert_eq!(Opcode::from_name(b"READ_FROM_FILE"), None);
        assert_eq!(Opcode::from_name(b"ping"), None);
        assert_eq!(Opcode::from_name(b""), None);
    }

    #[test]
    fn test_request_field_order() {
        let bytes = encode(&Request::ReadFromFileSection {
            section: 2,
            offset: 10,
            length: 5,
        });
        let mut expected = vec![22];
        expected.extend_from_slice(b"READ_FROM_FILE_SECTION");
        expected.extend_from_slice(&[2, 0, 0, 0, 10, 0, 0, 0, 5, 0, 0, 0]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_map_file_request() {
        let request = Request::MapFile {
            path: PathBuf::from("/tmp/test.sf"),
        };
        let bytes = encode(&request);
        assert_eq!(&bytes[..9], b"\x08MAP_FILE");
        assert_eq!(&bytes[9..], b"\x0c/tmp/test.sf");
        assert_eq!(Request::read_from(&mut Cursor::new(bytes)).unwrap(), request);
    }

    #[test]
    fn test_every_request_decodes() {
        let requests = [
            Request::Ping,
            Request::CreateSharedMemory { size: 2_097_152 },
            Request::WriteToSharedMemory {
                offset: 12,
                value: 0xDEADBEEF,
            },
            Request::ReadFromFileOffset {
                offset: 1,
                length: 2,
            },
            Request::ReadFromLogicalOffset {
                logical_offset: 6144,
                length: 3,
            },
            Request::Exit,
        ];
        let mut stream = Vec::new();
        for request in &requests {
            request.write_to(&mut stream).unwrap();
        }

        let mut input = Cursor::new(stream);
        for request in &requests {
            assert_eq!(&Request::read_from(&mut input).unwrap(), request);
        }
        assert!(Request::read_from(&mut input).unwrap_err().is_closed());
    }

    #[test]
    fn test_unknown_request_keeps_name() {
        let mut input = Cursor::new(b"\x05HELLO".to_vec());
        let request = Request::read_from(&mut input).unwrap();
        assert_eq!(
            request,
            Request::Unknown {
                name: b"HELLO".to_vec()
            }
        );
        assert_eq!(request.name(), "HELLO");
        assert_eq!(request.opcode(), None);
    }

    #[test]
    fn test_truncated_request_parameters() {
        // CREATE_SHM with only two bytes of the size field
        let mut input = Cursor::new(b"\x0aCREATE_SHM\x00\x10".to_vec());
        assert!(Request::read_from(&mut input).unwrap_err().is_closed());
    }

    #[test]
    fn test_pong_layout() {
        let mut out = Vec::new();
        Response::Pong { id: 41938 }.write_to(&mut out).unwrap();
        assert_eq!(out, b"\x04PING\x04PONG\xd2\xa3\x00\x00");

        let decoded = Response::read_from(&mut Cursor::new(out)).unwrap();
        assert_eq!(decoded, Response::Pong { id: 41938 });
        assert!(decoded.is_success());
        assert_eq!(decoded.name_bytes(), b"PING");
    }

    #[test]
    fn test_status_responses() {
        let mut out = Vec::new();
        Response::success(b"MAP_FILE").write_to(&mut out).unwrap();
        Response::error(b"CREATE_SHM").write_to(&mut out).unwrap();

        let mut input = Cursor::new(out);
        let first = Response::read_from(&mut input).unwrap();
        assert_eq!(first.name_bytes(), b"MAP_FILE");
        assert_eq!(first.status(), Status::Success);

        let second = Response::read_from(&mut input).unwrap();
        assert_eq!(second.name_bytes(), b"CREATE_SHM");
        assert_eq!(second.status(), Status::Error);
    }

    #[test]
    fn test_unknown_status_is_malformed() {
        let mut input = Cursor::new(b"\x04EXIT\x05MAYBE".to_vec());
        assert!(matches!(
            Response::read_from(&mut input),
            Err(WireError::Malformed(_))
        ));
    }
}
