//! sfpipe - serves SF file ranges through shared memory over a pair of named pipes

mod pipe;

use clap::Parser;
use colored::Colorize;
use pipe::ServerPipes;
use sfpipe_shared::{
    PING_ID, REQUEST_PIPE_NAME, RESPONSE_PIPE_NAME, Request, RequestError, SHARED_MEMORY_NAME,
    SHARED_MEMORY_SIZE, Served, ServerConfig, ServerSession,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "sfpipe")]
#[command(about = "Named-pipe server exposing SF files through shared memory")]
#[command(version)]
struct Args {
    /// Request pipe, created by the client
    #[arg(long, default_value = REQUEST_PIPE_NAME)]
    req_pipe: PathBuf,

    /// Response pipe, created by the server
    #[arg(long, default_value = RESPONSE_PIPE_NAME)]
    resp_pipe: PathBuf,

    /// Name of the POSIX shared memory object
    #[arg(long, default_value = SHARED_MEMORY_NAME)]
    shm_name: String,

    /// Region size CREATE_SHM must ask for
    #[arg(long, default_value_t = SHARED_MEMORY_SIZE)]
    shm_size: u32,

    /// Report successful requests too
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        print_banner();
    }

    let pipes = ServerPipes::new(&args.req_pipe, &args.resp_pipe);
    if args.verbose {
        println!(
            "{} Waiting for a client on {}",
            "[INFO]".blue(),
            pipes.request_path().display()
        );
    }

    let (requests, responses) = match pipes.open() {
        Ok(channels) => channels,
        Err(e) => {
            println!("ERROR");
            println!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let config = ServerConfig {
        shm_name: args.shm_name,
        shm_size: args.shm_size,
        ping_id: PING_ID,
    };
    let mut session = ServerSession::new(requests, responses, config);

    println!("SUCCESS");

    if let Err(e) = session.open() {
        println!("ERROR");
        println!("cannot write to the response pipe: {e}");
        return ExitCode::FAILURE;
    }

    let verbose = args.verbose;
    match session.run(|served| display_served(served, verbose)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} Session ended: {}", "[ERROR]".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn print_banner() {
    println!();
    println!("{}", "SFPIPE".cyan().bold());
    println!("{}", "SF file server over named pipes".white());
    println!();
}

/// Report the outcome of one request
fn display_served(served: &Served, verbose: bool) {
    match &served.outcome {
        Ok(()) if served.is_exit() => {
            if verbose {
                println!("{} Client sent EXIT", "[INFO]".blue());
            }
        }
        Ok(()) => {
            if verbose {
                println!("{} {}", "[OK]".green(), describe(&served.request));
            }
        }
        Err(RequestError::UnknownOperation(name)) => {
            eprintln!("{} Unknown operation {:?}", "[WARN]".yellow(), name);
        }
        Err(e) => {
            eprintln!("{} {}: {}", "[ERROR]".red(), describe(&served.request), e);
        }
    }
}

fn describe(request: &Request) -> String {
    match request {
        Request::CreateSharedMemory { size } => format!("CREATE_SHM size={size}"),
        Request::WriteToSharedMemory { offset, value } => {
            format!("WRITE_TO_SHM offset={offset} value={value:#010x}")
        }
        Request::MapFile { path } => format!("MAP_FILE {}", path.display()),
        Request::ReadFromFileOffset { offset, length } => {
            format!("READ_FROM_FILE_OFFSET offset={offset} length={length}")
        }
        Request::ReadFromFileSection {
            section,
            offset,
            length,
        } => format!("READ_FROM_FILE_SECTION section={section} offset={offset} length={length}"),
        Request::ReadFromLogicalOffset {
            logical_offset,
            length,
        } => format!("READ_FROM_LOGICAL_SPACE_OFFSET offset={logical_offset} length={length}"),
        other => other.name().into_owned(),
    }
}
