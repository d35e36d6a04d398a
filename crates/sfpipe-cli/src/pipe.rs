//! Named pipe setup and cleanup

use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipeError {
    #[error("cannot create the response pipe {path:?}: {source}")]
    CreateResponse { path: PathBuf, source: nix::Error },

    #[error("cannot open the request pipe {path:?}: {source}")]
    OpenRequest { path: PathBuf, source: io::Error },

    #[error("cannot open the response pipe {path:?}: {source}")]
    OpenResponse { path: PathBuf, source: io::Error },
}

/// The server's two FIFOs; both paths are unlinked on drop
///
/// The request pipe is created by the client, the response pipe by us.
pub struct ServerPipes {
    request: PathBuf,
    response: PathBuf,
}

impl ServerPipes {
    pub fn new(request: impl Into<PathBuf>, response: impl Into<PathBuf>) -> Self {
        Self {
            request: request.into(),
            response: response.into(),
        }
    }

    pub fn request_path(&self) -> &Path {
        &self.request
    }

    pub fn response_path(&self) -> &Path {
        &self.response
    }

    pub fn create_response(&self) -> Result<(), PipeError> {
        mkfifo(&self.response, Mode::S_IRUSR | Mode::S_IWUSR).map_err(|source| {
            PipeError::CreateResponse {
                path: self.response.clone(),
                source,
            }
        })
    }

    /// Blocks until the client opens the request pipe for writing
    pub fn open_request(&self) -> Result<File, PipeError> {
        File::open(&self.request).map_err(|source| PipeError::OpenRequest {
            path: self.request.clone(),
            source,
        })
    }

    /// Blocks until the client opens the response pipe for reading
    pub fn open_response(&self) -> Result<File, PipeError> {
        OpenOptions::new()
            .write(true)
            .open(&self.response)
            .map_err(|source| PipeError::OpenResponse {
                path: self.response.clone(),
                source,
            })
    }

    /// Create the response pipe and open both ends, in the order clients expect
    pub fn open(&self) -> Result<(File, File), PipeError> {
        self.create_response()?;
        let requests = self.open_request()?;
        let responses = self.open_response()?;
        Ok((requests, responses))
    }
}

impl Drop for ServerPipes {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.request);
        let _ = std::fs::remove_file(&self.response);
    }
}
