//! Fixtures shared by the integration tests

#![allow(dead_code)]

use sfpipe_shared::format::{SECTION_HEADER_SIZE, SECTION_NAME_LEN, SF_HEADER_SIZE, SF_MAGIC};
use sfpipe_shared::{SectionHeader, ServerConfig, ServerSession, SessionError, SfClient, SfHeader};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::thread::JoinHandle;
use tempfile::NamedTempFile;

/// Region size used by test servers
pub const TEST_SHM_SIZE: u32 = 8192;

/// Section payloads of the default fixture: (type, size)
pub const SECTIONS: [(i32, usize); 5] = [(19, 4000), (10, 2000), (58, 100), (57, 50), (11, 10)];

/// Deterministic content for section `index`
pub fn section_data(index: usize, size: usize) -> Vec<u8> {
    (0..size)
        .map(|j| ((j % 251) as u8).wrapping_add(index as u8 * 40))
        .collect()
}

/// Build an SF image: header, section table, then section payloads in order
pub fn build_sf(version: i16, sections: &[(i32, Vec<u8>)]) -> Vec<u8> {
    let table_end = SF_HEADER_SIZE + sections.len() * SECTION_HEADER_SIZE;
    let header = SfHeader {
        magic: *SF_MAGIC,
        header_size: table_end as u16,
        version,
        section_count: sections.len() as u8,
    };

    let mut bytes = header.to_bytes().to_vec();
    let mut offset = table_end;
    for (i, (sect_type, data)) in sections.iter().enumerate() {
        let mut name = [0u8; SECTION_NAME_LEN];
        let label = format!("section_{}", i + 1);
        name[..label.len()].copy_from_slice(label.as_bytes());

        let record = SectionHeader {
            name,
            sect_type: *sect_type,
            offset: offset as i32,
            size: data.len() as i32,
        };
        bytes.extend_from_slice(&record.to_bytes());
        offset += data.len();
    }
    for (_, data) in sections {
        bytes.extend_from_slice(data);
    }
    bytes
}

/// The default five-section fixture
pub fn default_sf() -> (Vec<u8>, Vec<Vec<u8>>) {
    let payloads: Vec<Vec<u8>> = SECTIONS
        .iter()
        .enumerate()
        .map(|(i, &(_, size))| section_data(i, size))
        .collect();
    let sections: Vec<(i32, Vec<u8>)> = SECTIONS
        .iter()
        .zip(&payloads)
        .map(|(&(sect_type, _), data)| (sect_type, data.clone()))
        .collect();
    (build_sf(80, &sections), payloads)
}

/// File offset of section `index` (zero-based) in an image built by [`build_sf`]
pub fn section_file_offset(payloads: &[Vec<u8>], index: usize) -> usize {
    SF_HEADER_SIZE
        + payloads.len() * SECTION_HEADER_SIZE
        + payloads[..index].iter().map(Vec::len).sum::<usize>()
}

pub fn write_temp(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

/// Generate a unique shared memory name for each test to avoid conflicts
pub fn unique_shm_name() -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    format!(
        "/sfpipe_it_{}_{}",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::SeqCst)
    )
}

pub fn test_config() -> ServerConfig {
    ServerConfig {
        shm_name: unique_shm_name(),
        shm_size: TEST_SHM_SIZE,
        ..ServerConfig::default()
    }
}

/// Contents of a live shared memory object, read through /dev/shm
pub fn read_region(name: &str) -> Option<Vec<u8>> {
    std::fs::read(Path::new("/dev/shm").join(&name[1..])).ok()
}

pub type ServerThread = JoinHandle<(Result<(), SessionError>, Vec<(String, bool)>)>;

/// Start a server thread connected to a client through two OS pipes
pub fn spawn_server(config: ServerConfig) -> (SfClient<File, File>, ServerThread) {
    let (req_read, req_write) = pipe();
    let (resp_read, resp_write) = pipe();

    let server = std::thread::spawn(move || {
        let mut session = ServerSession::new(req_read, resp_write, config);
        let mut log = Vec::new();
        let result = session.run(|served| {
            log.push((served.request.name().into_owned(), served.outcome.is_ok()))
        });
        (result, log)
    });

    let client = SfClient::connect(resp_read, req_write).unwrap();
    (client, server)
}

fn pipe() -> (File, File) {
    let (read, write) = nix::unistd::pipe().unwrap();
    (File::from(read), File::from(write))
}
