//! Shared types and pipe protocol for sfpipe
//!
//! The server answers requests arriving on one named pipe by writing
//! responses to another, serving byte ranges of a mapped SF file through a
//! POSIX shared memory region.
//!
//! # Architecture
//!
//! - [`wire`] - string and number field codec
//! - [`format`] - SF header and section table decoding and validation
//! - [`translate`] - raw, section and logical offsets to file ranges
//! - [`mapping`] - file mapping and shared memory lifecycle
//! - [`messages`] - [`Request`] and [`Response`] field sequences
//! - [`session`] - [`ServerSession`], the request dispatcher
//! - [`client`] - [`SfClient`] for driving a server

#![deny(missing_docs)]

pub mod client;
pub mod format;
pub mod mapping;
pub mod messages;
pub mod session;
pub mod translate;
pub mod wire;

pub use client::SfClient;
pub use format::{FormatError, SectionHeader, SfFile, SfHeader, parse_header, parse_section_header};
pub use mapping::{FileMapping, MappingError, SharedRegion};
pub use messages::{Opcode, Request, Response, Status};
pub use session::{RequestError, Served, ServerConfig, ServerSession, SessionError, SessionState};
pub use translate::{BoundsError, FileRange, LOGICAL_PAGE_SIZE, Limits, TranslateError};
pub use wire::WireError;

/// Pipe the server reads requests from (created by the client)
pub const REQUEST_PIPE_NAME: &str = "REQ_PIPE_41938";

/// Pipe the server writes responses to (created by the server)
pub const RESPONSE_PIPE_NAME: &str = "RESP_PIPE_41938";

/// Name of the shared memory object created by `CREATE_SHM`
pub const SHARED_MEMORY_NAME: &str = "/sfpipe_41938";

/// Size `CREATE_SHM` must ask for
pub const SHARED_MEMORY_SIZE: u32 = 2 * 1024 * 1024; // 2MB

/// Number sent back with `PONG`
pub const PING_ID: u32 = 41938;
