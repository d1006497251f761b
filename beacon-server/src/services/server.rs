use std::future::Future;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use axum::ServiceExt;
use axum::extract::Request;
use axum::http::{HeaderValue, header};
use axum_server::Handle;
use beacon_config::Config;
use beacon_statsd::metric;
use hyper_util::rt::TokioTimer;
use sentry::integrations::tower::{NewSentryLayer, SentryHttpLayer};
use tokio::net::TcpSocket;
use tower::ServiceBuilder;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::constants;
use crate::middlewares::{self, CatchPanicLayer, NormalizePath};
use crate::service::ServiceState;
use crate::statsd::{BeaconCounters, BeaconGauges};

/// Set a timeout for reading client request headers. If a client does not transmit the entire
/// header within this time, the connection is closed.
const CLIENT_HEADER_TIMEOUT: Duration = Duration::from_secs(5);

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Binding failed.
    #[error("bind to interface failed")]
    BindFailed(#[from] std::io::Error),

    /// The server stopped with an I/O error.
    #[error("http server failed")]
    ServeFailed(#[source] std::io::Error),
}

/// The router with all middlewares applied.
pub type App = NormalizePath<axum::Router>;

/// Builds the axum application with all routes and middleware.
pub fn make_app(service: ServiceState) -> App {
    // Build the router middleware into a single service which runs _after_ routing. Service
    // builder order defines layers added first will be called first. This means:
    //  - Requests go from top to bottom
    //  - Responses go from bottom to top
    let middleware = ServiceBuilder::new()
        .layer(axum::middleware::from_fn(middlewares::metrics))
        .layer(ConcurrencyLimitLayer::new(service.config().max_connections()))
        .layer(CatchPanicLayer::custom(middlewares::handle_panic))
        .layer(SetResponseHeaderLayer::overriding(
            header::SERVER,
            HeaderValue::from_static(constants::SERVER),
        ))
        .layer(NewSentryLayer::new_from_top())
        .layer(SentryHttpLayer::new().enable_transaction())
        .layer(middlewares::trace_http_layer());

    let router = crate::endpoints::routes()
        .layer(middleware)
        .with_state(service);

    // Slashes are folded before routing, so this wraps the router.
    NormalizePath::new(router)
}

fn listen(addr: SocketAddr, config: &Config) -> Result<TcpListener, ServerError> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    #[cfg(all(unix, not(target_os = "solaris"), not(target_os = "illumos")))]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(config.tcp_listen_backlog())?.into_std()?)
}

async fn serve<F>(listener: TcpListener, app: App, config: &Config, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let handle = Handle::new();

    let mut server = axum_server::from_tcp(listener).handle(handle.clone());

    server
        .http_builder()
        .http1()
        .timer(TokioTimer::new())
        .half_close(true)
        .keep_alive(true)
        .header_read_timeout(CLIENT_HEADER_TIMEOUT)
        .writev(true);

    let service = ServiceExt::<Request>::into_make_service_with_connect_info::<SocketAddr>(app);

    let connections = tokio::spawn(emit_active_connections_metric(
        config.metrics_periodic_interval(),
        handle.clone(),
    ));

    let shutdown_timeout = config.shutdown_timeout();
    tokio::spawn(async move {
        shutdown.await;
        beacon_log::info!("shutting down HTTP server");
        handle.graceful_shutdown(Some(shutdown_timeout));
    });

    let result = server.serve(service).await;
    connections.abort();
    result
}

/// HTTP server.
///
/// Hosts the ingest and health check endpoints. The listener is bound when the server is
/// created, so that binding errors surface before the server is started.
pub struct HttpServer {
    config: Arc<Config>,
    service: ServiceState,
    listener: TcpListener,
}

impl HttpServer {
    /// Binds the listen address of the configuration.
    pub fn new(config: Arc<Config>, service: ServiceState) -> Result<Self, ServerError> {
        let listener = listen(config.listen_addr(), &config)?;

        Ok(Self {
            config,
            service,
            listener,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves requests until `shutdown` completes, then drains connections gracefully.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            config,
            service,
            listener,
        } = self;

        beacon_log::info!("spawning http server");
        beacon_log::info!("  listening on http://{}/", config.listen_addr());
        metric!(counter(BeaconCounters::ServerStarting) += 1);

        let app = make_app(service);
        serve(listener, app, &config, shutdown)
            .await
            .map_err(ServerError::ServeFailed)
    }
}

async fn emit_active_connections_metric(interval: Option<Duration>, handle: Handle) {
    let Some(mut ticker) = interval.map(tokio::time::interval) else {
        return;
    };

    let addr = handle.listening().await.map(|addr| addr.to_string());

    loop {
        ticker.tick().await;
        metric!(
            gauge(BeaconGauges::ServerActiveConnections) = handle.connection_count() as u64,
            addr = addr.as_deref().unwrap_or("unknown"),
        );
    }
}

/// Completes when the process receives `SIGINT` or `SIGTERM`.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(mut terminate), Ok(mut interrupt)) => {
                tokio::select! {
                    _ = terminate.recv() => beacon_log::info!("received SIGTERM"),
                    _ = interrupt.recv() => beacon_log::info!("received SIGINT"),
                }
                return;
            }
            (Err(error), _) | (_, Err(error)) => {
                beacon_log::warn!(
                    error = &error as &dyn std::error::Error,
                    "failed to install signal handlers, falling back to ctrl-c"
                );
            }
        }
    }

    if let Err(error) = tokio::signal::ctrl_c().await {
        beacon_log::error!(
            error = &error as &dyn std::error::Error,
            "failed to listen for ctrl-c, shutting down"
        );
    }
}
