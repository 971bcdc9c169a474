mod cli;

use std::io::Write as _;
use std::net::SocketAddr;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use common::FileType;
use log::error;
use rknfs::{ClientError, NfsSession, QuicTransport};

// bytes per READ while streaming a file to stdout
const READ_CHUNK: u32 = 64 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let addr: SocketAddr = cli
        .conn
        .addr
        .parse()
        .with_context(|| format!("Invalid server address {}", cli.conn.addr))?;
    let transport = QuicTransport::new(addr)?;
    let session = NfsSession::new(transport, cli.conn.policy());

    if let Err(e) = run(&session, cli.command).await {
        error!("{e}");
        std::process::exit(e.code().abs());
    }
    Ok(())
}

async fn run(session: &NfsSession<QuicTransport>, command: Commands) -> Result<(), ClientError> {
    match command {
        Commands::Lookup { path } => {
            println!("{}", session.lookup(&path).await?);
        }
        Commands::Stat { path } => {
            let attr = session.getattr(&path).await?;
            let kind = match attr.file_type {
                FileType::Directory => "directory",
                FileType::Regular => "regular file",
                FileType::Other => "other",
            };
            println!("  File: {path}");
            println!("  Type: {kind}");
            println!("  Size: {}", attr.size);
            println!(" Inode: {}", attr.fileid);
            println!("  Mode: {:o}", attr.mode & 0o7777);
            println!("Access: {}", attr.atime);
            println!("Modify: {}", attr.mtime);
            println!("Change: {}", attr.ctime);
        }
        Commands::Cat { path, mut offset } => {
            let mut stdout = std::io::stdout().lock();
            loop {
                let data = session.read(&path, offset, READ_CHUNK).await?;
                if data.is_empty() {
                    break;
                }
                offset += data.len() as u64;
                if let Err(e) = stdout.write_all(&data) {
                    error!("stdout: {e}");
                    break;
                }
            }
        }
        Commands::Write {
            path,
            data,
            offset,
            stable,
        } => {
            if stable {
                let n = session.write_stable(&path, offset, data.as_bytes()).await?;
                println!("wrote {n} bytes (stable)");
            } else {
                let n = session.write(&path, offset, data.as_bytes()).await?;
                let outcome = session.commit(&path).await?;
                println!("wrote {n} bytes, commit: {outcome:?}");
            }
        }
        Commands::Truncate { path, size } => session.setattr(&path, size).await?,
        Commands::Mkdir { path, mode } => session.mkdir(&path, mode).await?,
        Commands::Rmdir { path } => session.rmdir(&path).await?,
        Commands::Touch { path, mode } => session.create(&path, mode).await?,
        Commands::Rm { path } => session.remove(&path).await?,
    }
    Ok(())
}
