//! filecourier-client: upload or download one file.
//!
//! ```text
//! filecourier-client upload <FILE> <HOST:PORT>
//! filecourier-client download <HOST:PORT>@<NAME>
//! ```

use clap::{Parser, Subcommand};
use filecourier::client::Client;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "filecourier-client")]
#[command(version)]
#[command(about = "Upload or download a file from a filecourier server", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a local file to the server
    Upload {
        /// File to upload
        file: PathBuf,
        /// Server address
        server: String,
        /// Name to store the file under (defaults to the file's name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Fetch a file from the server
    Download {
        /// Server address and file name, as HOST:PORT@NAME
        target: String,
        /// Where to write the file (defaults to NAME in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Split `HOST:PORT@NAME` at the first `@`.
fn parse_target(target: &str) -> Option<(&str, &str)> {
    let (server, name) = target.split_once('@')?;
    let (host, port) = server.rsplit_once(':')?;
    if host.is_empty() || name.is_empty() || port.parse::<u16>().map_or(true, |p| p == 0) {
        return None;
    }
    Some((server, name))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Command::Upload { file, server, name } => {
            let name = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .ok_or("upload path has no file name")?,
            };

            let mut client = Client::connect(server.as_str()).await?;
            info!(server = %server, "Connected");
            let result = client.upload(&file, &name).await;
            client.close().await?;
            if let Err(e) = &result {
                error!(error = %e, "Upload failed");
            }
            result?;
        }
        Command::Download { target, output } => {
            let Some((server, name)) = parse_target(&target) else {
                return Err(format!("expected HOST:PORT@NAME, got '{target}'").into());
            };
            let dest = output.unwrap_or_else(|| PathBuf::from(name));

            let mut client = Client::connect(server).await?;
            info!(server = %server, "Connected");
            let result = client.download(name, &dest).await;
            client.close().await?;
            if let Err(e) = &result {
                error!(error = %e, "Download failed");
            }
            result?;
        }
    }

    Ok(())
}
