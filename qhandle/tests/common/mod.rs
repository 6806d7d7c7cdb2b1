// common is submod for echo and blocking tests
#![allow(unused)]

use std::{
    future::Future,
    net::SocketAddr,
    sync::{Arc, LazyLock},
    time::Duration,
};

use qhandle::{
    ClientParameters, Connection, QuicClient, QuicListener, SelfSigned, ServerParameters, Stream,
};
use tokio::time;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    Layer, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub const SERVER_HOST: &str = "127.0.0.1";
pub const TEST_DATA: &[u8] = include_bytes!("mod.rs");

pub fn init_tracing() {
    static TRACING: LazyLock<WorkerGuard> = LazyLock::new(|| {
        let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking)
                    .with_file(true)
                    .with_line_number(true)
                    .with_filter(LevelFilter::DEBUG),
            )
            .with(tracing_subscriber::filter::filter_fn(|metadata| {
                !metadata.target().starts_with("rustls")
            }))
            .init();
        guard
    });
    LazyLock::force(&TRACING);
}

pub fn run<F: Future>(future: F) -> F::Output {
    static RT: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .unwrap()
    });

    RT.block_on(async move {
        init_tracing();
        match time::timeout(Duration::from_secs(60), future).await {
            Ok(output) => output,
            Err(_timedout) => panic!("test timed out"),
        }
    })
}

/// The identity of every test server, trusted by every test client.
pub fn server_identity() -> &'static SelfSigned {
    static IDENTITY: LazyLock<SelfSigned> = LazyLock::new(|| {
        SelfSigned::generate("localhost,127.0.0.1").expect("failed to generate certificate")
    });
    &IDENTITY
}

pub fn launch_test_client(parameters: ClientParameters) -> Arc<QuicClient> {
    let client = QuicClient::builder()
        .add_root_certs(server_identity().cert_pem().as_bytes())
        .unwrap()
        .with_parameters(parameters)
        .enable_sslkeylog()
        .build()
        .unwrap();
    Arc::new(client)
}

pub fn launch_listener(parameters: ServerParameters) -> Result<Arc<QuicListener>, BoxError> {
    launch_listener_with_backlog(parameters, 128)
}

pub fn launch_listener_with_backlog(
    parameters: ServerParameters,
    backlog: usize,
) -> Result<Arc<QuicListener>, BoxError> {
    let identity = server_identity();
    let listener = QuicListener::builder()
        .with_parameters(parameters)
        .with_cert(identity.cert_der(), identity.key_der())?
        .listen(SocketAddr::from(([127, 0, 0, 1], 0)), backlog)?;
    Ok(Arc::new(listener))
}

pub async fn echo_stream(stream: Stream) {
    let sid = stream.id();
    let (mut writer, mut reader) = stream.split();
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(copied) => {
            _ = writer.finish();
            _ = writer.stopped().await;
            tracing::debug!(%sid, copied, "stream copy done");
        }
        Err(error) => tracing::debug!(%sid, %error, "stream copy aborted"),
    }
}

pub async fn echo_messages(connection: Connection) {
    while let Ok(message) = connection.receive_message().await {
        if connection.send_message(message).is_err() {
            break;
        }
    }
}

pub async fn serve_echo(listener: Arc<QuicListener>) {
    while let Ok(connection) = listener.accept().await {
        tracing::info!(source = %connection.remote_addr(), "accepted new connection");
        tokio::spawn(echo_messages(connection.clone()));
        tokio::spawn(async move {
            while let Ok(stream) = connection.accept_stream().await {
                tokio::spawn(echo_stream(stream));
            }
        });
    }
}

pub fn launch_echo_server(
    parameters: ServerParameters,
) -> Result<(Arc<QuicListener>, impl Future<Output = ()> + Send), BoxError> {
    let listener = launch_listener(parameters)?;
    Ok((listener.clone(), serve_echo(listener)))
}
