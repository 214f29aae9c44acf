//! The HTTP scrape endpoint.
//!
//! `GET /metrics` runs the collector and answers with the text exposition of
//! the registry it returns, followed by the exporter's own telemetry when a
//! [`PrometheusHandle`] is supplied. A failed collection answers `500` and
//! the server keeps running. Collections never overlap: concurrent scrapes
//! queue behind one another.
//!
//! ## Metrics
//!
//! `az_vm_exporter_connections`: Connections currently being served
//! `az_vm_exporter_connection_limit`: Maximum concurrent connections
//!

use std::{convert::Infallible, future::Future, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use http::{HeaderValue, Method, Request, Response, StatusCode, header};
use http_body_util::Full;
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use metrics::gauge;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{
    net::TcpListener,
    pin,
    sync::{Mutex, Semaphore, TryAcquireError},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    collector::Collector,
    exposition::{self, CONTENT_TYPE},
};

/// Path of the scrape endpoint.
pub const METRICS_PATH: &str = "/metrics";

/// Default maximum of concurrently served connections
#[must_use]
pub fn default_concurrency_limit() -> usize {
    16
}

/// Errors produced by [`Server`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// The requested address
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// The bound address could not be read back.
    #[error("failed to read local address: {0}")]
    LocalAddr(std::io::Error),
}

struct State<C> {
    collector: C,
    scrape_lock: Mutex<()>,
    telemetry: Option<PrometheusHandle>,
}

/// The scrape server.
pub struct Server<C> {
    listener: TcpListener,
    local_addr: SocketAddr,
    concurrency_limit: usize,
    state: Arc<State<C>>,
}

impl<C> std::fmt::Debug for Server<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("concurrency_limit", &self.concurrency_limit)
            .finish_non_exhaustive()
    }
}

fn plain(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body.into()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}

async fn handle<C>(state: &State<C>, req: Request<Incoming>) -> Response<Full<Bytes>>
where
    C: Collector,
{
    // Scrapes carry no body worth reading.
    let (parts, body) = req.into_parts();
    drop(body);

    if parts.uri.path() != METRICS_PATH {
        return plain(StatusCode::NOT_FOUND, "Not Found\n");
    }
    if parts.method != Method::GET && parts.method != Method::HEAD {
        let mut resp = plain(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed\n");
        resp.headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        return resp;
    }

    let res = {
        let _guard = state.scrape_lock.lock().await;
        state.collector.collect().await
    };

    let registry = match res {
        Ok(registry) => registry,
        Err(err) => {
            error!("scrape failed: {err}");
            return plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("scrape failed: {err}\n"),
            );
        }
    };

    let mut body = String::new();
    if let Err(err) = exposition::encode(&registry, &mut body) {
        error!("failed to encode scrape: {err}");
        return plain(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode scrape\n");
    }
    if let Some(handle) = &state.telemetry {
        body.push_str(&handle.render());
    }
    let mut resp = plain(StatusCode::OK, body);
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE));
    resp
}

impl<C> Server<C>
where
    C: Collector + 'static,
{
    /// Bind a new [`Server`] to `addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(
        addr: SocketAddr,
        collector: C,
        telemetry: Option<PrometheusHandle>,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        let local_addr = listener.local_addr().map_err(Error::LocalAddr)?;
        Ok(Self {
            listener,
            local_addr,
            concurrency_limit: default_concurrency_limit(),
            state: Arc::new(State {
                collector,
                scrape_lock: Mutex::new(()),
                telemetry,
            }),
        })
    }

    /// Cap the number of concurrently served connections. Connections beyond
    /// the cap are dropped on accept.
    #[must_use]
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// The address the server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run [`Server`] until `shutdown` resolves.
    ///
    /// Connections still open at shutdown are aborted. Failures to accept or
    /// serve a single connection are logged and do not stop the server.
    #[allow(clippy::cast_precision_loss)]
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let sem = Arc::new(Semaphore::new(self.concurrency_limit));
        let mut join_set = JoinSet::new();

        gauge!("az_vm_exporter_connection_limit").set(self.concurrency_limit as f64);
        info!("serving scrapes on http://{}{METRICS_PATH}", self.local_addr);

        pin!(shutdown);
        loop {
            let claimed_permits = self.concurrency_limit - sem.available_permits();
            gauge!("az_vm_exporter_connections").set(claimed_permits as f64);

            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown signal received, stopping accept loop");
                    break;
                }

                Some(_) = join_set.join_next(), if !join_set.is_empty() => {}

                incoming = self.listener.accept() => {
                    let (stream, addr) = match incoming {
                        Ok(sa) => sa,
                        Err(e) => {
                            error!("error accepting connection: {e}");
                            continue;
                        }
                    };
                    debug!("accepted connection from {addr}");

                    let permit = match Arc::clone(&sem).try_acquire_owned() {
                        Ok(p) => p,
                        Err(TryAcquireError::Closed) => {
                            error!("semaphore closed");
                            break;
                        }
                        Err(TryAcquireError::NoPermits) => {
                            warn!("over connection capacity, dropping connection from {addr}");
                            drop(stream);
                            continue;
                        }
                    };

                    let state = Arc::clone(&self.state);
                    join_set.spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let state = Arc::clone(&state);
                            async move { Ok::<_, Infallible>(handle(&state, req).await) }
                        });
                        if let Err(e) = http1::Builder::new()
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!("error serving {addr}: {e}");
                        }
                        drop(permit);
                    });
                }
            }
        }

        drop(self.listener);
        join_set.shutdown().await;
    }
}
