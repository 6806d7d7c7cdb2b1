use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use clap::Parser;
use qhandle::{QuicListener, SelfSigned, Stream, handy::server_parameters};
use tokio::io;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(name = "server")]
struct Options {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:4433",
        help = "What address:port to listen for new connections"
    )]
    listen: SocketAddr,
    #[arg(
        long,
        short,
        default_value = "128",
        help = "Maximum number of connections in the backlog. \
                If the backlog is full, new connections will be refused."
    )]
    backlog: usize,
    #[arg(
        long,
        default_value = "true",
        action = clap::ArgAction::Set,
        help = "Enable ANSI color output in logs"
    )]
    ansi: bool,
    #[command(flatten)]
    certs: Certs,
}

#[derive(Parser, Debug)]
struct Certs {
    #[arg(
        long,
        short,
        requires = "key",
        help = "Certificate for TLS. Without it a self signed certificate is generated."
    )]
    cert: Option<PathBuf>,
    #[arg(long, short, help = "Private key for the certificate.")]
    key: Option<PathBuf>,
    #[arg(
        long,
        default_value = "localhost,127.0.0.1",
        help = "Hosts of the self signed certificate, comma separated."
    )]
    hosts: String,
    #[arg(long, help = "Write the self signed certificate to this file.")]
    write_cert: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let options = Options::parse();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(options.ansi)
                .with_filter(
                    tracing_subscriber::EnvFilter::builder()
                        .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                        .from_env_lossy(),
                ),
        )
        .init();

    if let Err(error) = run(options).await {
        tracing::info!(%error);
        std::process::exit(1);
    }
}

async fn run(options: Options) -> qhandle::Result<()> {
    let builder = QuicListener::builder().with_parameters(server_parameters());
    let builder = match (&options.certs.cert, &options.certs.key) {
        (Some(cert), Some(key)) => builder.with_cert(cert.as_path(), key.as_path())?,
        _ => {
            let signed = SelfSigned::generate(&options.certs.hosts)?;
            if let Some(path) = &options.certs.write_cert {
                std::fs::write(path, signed.cert_pem())?;
                info!(path = %path.display(), "self signed certificate written");
            }
            builder.with_cert(signed.cert_der(), signed.key_der())?
        }
    };

    let listener = Arc::new(builder.listen(options.listen, options.backlog)?);
    info!("Listening on {}", listener.local_addr()?);

    serve_echo(listener).await
}

async fn serve_echo(listener: Arc<QuicListener>) -> qhandle::Result<()> {
    async fn handle_stream(stream: Stream) -> io::Result<()> {
        let (mut writer, mut reader) = stream.split();
        io::copy(&mut reader, &mut writer).await?;
        writer.finish()?;
        tracing::debug!("Stream copy done");

        io::Result::Ok(())
    }

    loop {
        let connection = listener.accept().await?;
        info!(source = %connection.remote_addr(), "accepted new connection");
        tokio::spawn(async move {
            while let Ok(stream) = connection.accept_stream().await {
                tokio::spawn(async move {
                    if let Err(error) = handle_stream(stream).await {
                        tracing::debug!(%error, "stream copy aborted");
                    }
                });
            }
        });
    }
}
