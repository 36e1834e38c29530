//! HTTP(S) server.

use crate::app::Service;
use crate::cli::CommandLineArgs;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use axum::ServiceExt;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use expanduser::expanduser;
use tokio::signal;
use tracing::{event, Level};

/// Parse the listen address from the host and port arguments.
fn listen_addr(args: &CommandLineArgs) -> io::Result<SocketAddr> {
    SocketAddr::from_str(&format!("{}:{}", args.host, args.port)).map_err(|err| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid listen address {}:{}: {}", args.host, args.port, err),
        )
    })
}

/// Expand `~` in a TLS file path and resolve it to an existing absolute path.
fn tls_file(path: &str, kind: &str) -> io::Result<PathBuf> {
    expanduser(path)
        .and_then(|path| path.canonicalize())
        .map_err(|err| io::Error::new(err.kind(), format!("TLS {kind} file {path}: {err}")))
}

/// Serve the REF metric value API until a shutdown signal is received
///
/// # Arguments
///
/// * `args`: Command line arguments
/// * `service`: The [Service] to serve
pub async fn serve(args: &CommandLineArgs, service: Service) -> io::Result<()> {
    let addr = listen_addr(args)?;

    let handle = Handle::new();
    tokio::spawn(shutdown_signal(
        handle.clone(),
        Duration::from_secs(args.graceful_shutdown_timeout),
    ));

    if args.https {
        let cert_file = tls_file(&args.cert_file, "certificate")?;
        let key_file = tls_file(&args.key_file, "key")?;
        let tls_config = RustlsConfig::from_pem_file(cert_file, key_file).await?;
        event!(Level::INFO, "listening on https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .handle(handle)
            .serve(service.into_make_service())
            .await
    } else {
        event!(Level::INFO, "listening on http://{}", addr);
        axum_server::bind(addr)
            .handle(handle)
            .serve(service.into_make_service())
            .await
    }
}

/// Wait for Ctrl-C or SIGTERM, then start a graceful shutdown.
///
/// Requests still running after `timeout` are dropped.
async fn shutdown_signal(handle: Handle, timeout: Duration) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            event!(Level::ERROR, "failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                event!(Level::ERROR, "failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    event!(
        Level::INFO,
        "shutting down, waiting up to {}s for requests to complete",
        timeout.as_secs()
    );
    handle.graceful_shutdown(Some(timeout));
}
