use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use qhandle::{QuicClient, QuicHandle, handy::client_parameters};
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "client")]
struct Options {
    #[arg(
        long,
        short,
        value_delimiter = ',',
        help = "Certificates of CA who issues the server certificate, or the server certificate itself"
    )]
    roots: Vec<PathBuf>,
    #[arg(long, help = "Accept any server certificate")]
    insecure: bool,
    #[arg(default_value = "localhost", help = "Host to connect to")]
    host: String,
    #[arg(default_value = "4433", help = "Port to connect to")]
    port: u16,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(error) = run(Options::parse()).await {
        tracing::info!(%error, code = error.code(), "client error");
        std::process::exit(error.code());
    };
}

async fn run(options: Options) -> qhandle::Result<()> {
    let mut builder = QuicClient::builder().with_parameters(client_parameters());
    if options.insecure {
        builder = builder.insecure_skip_verify();
    } else {
        builder = builder.with_native_roots();
        for path in &options.roots {
            builder = builder.add_root_certs(path.as_path())?;
        }
    }

    let mut handle = QuicHandle::with_client(Arc::new(builder.build()?));
    handle.connect(&options.host, options.port).await?;
    info!(remote = ?handle.remote_addr(), "connected");

    let mut stdin = io::BufReader::new(io::stdin());
    let mut stdout = io::stdout();

    loop {
        stdout.write_all(b">").await?;
        stdout.flush().await?;

        let mut line = String::new();
        if stdin.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        handle.send(line.as_bytes()).await?;
        tracing::debug!("client sent: `{line}`");

        let mut echo = vec![0u8; line.len()];
        let mut received = 0;
        while received < echo.len() {
            let n = handle.receive(&mut echo[received..]).await?;
            if n == 0 {
                break;
            }
            received += n;
        }
        info!("server echoed: `{}`", String::from_utf8_lossy(&echo[..received]));
    }

    handle.close().await
}
