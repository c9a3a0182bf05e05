use std::io::{self, Write};
use std::path::PathBuf;

use upload_pack_engine::{Server, ServerOptions};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Gitoxide Upload-Pack Server ===");
    println!("A comprehensive Git upload-pack implementation using gitoxide components");

    let args: Vec<String> = std::env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <repository-path>", args[0]);
        eprintln!();
        eprintln!("This server implements the Git upload-pack protocol with full compatibility");
        eprintln!("to upstream Git, supporting both protocol v0 and v2.");
        eprintln!();
        eprintln!("Features:");
        eprintln!("  - Git wire protocol v0 and v2 support");
        eprintln!("  - Efficient pack generation using gix-pack");
        eprintln!("  - multi_ack/multi_ack_detailed negotiation, shallow, object filters");
        eprintln!("  - Side-band communication with progress reporting");
        std::process::exit(1);
    }

    let repo_path = PathBuf::from(&args[1]);

    if !repo_path.exists() {
        eprintln!("Error: repository path '{}' does not exist", repo_path.display());
        std::process::exit(1);
    }

    println!("Initializing upload-pack server for repository: {}", repo_path.display());

    let options = ServerOptions::default();
    let mut server = match Server::new(repo_path, options) {
        Ok(server) => {
            println!("server initialized");
            server
        }
        Err(e) => {
            eprintln!("failed to initialize server: {e}");
            std::process::exit(1);
        }
    };

    println!("serving git protocol on stdin/stdout");

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdin_lock = stdin.lock();
    let mut stdout_lock = stdout.lock();

    match server.serve(&mut stdin_lock, &mut stdout_lock) {
        Ok(()) => {
            stdout_lock.flush()?;
            println!("session complete");
        }
        Err(e) => {
            eprintln!("protocol error: {e}");
            std::process::exit(1);
        }
    }

    Ok(())
}
