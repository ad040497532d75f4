// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Server-side registration and dispatch.
//!
//! [`Proxy`] is a tower service shaped like a tonic-generated server, except
//! the route table is data instead of generated match arms: explicitly
//! registered services resolve to unary- or streamed-proxied handling, and in
//! transparent mode every other method is proxied too. Each accepted call is
//! driven through `tonic::server::Grpc` with the passthrough codec and handed
//! to the forwarder picked by the director's mode.

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::future::{Ready, ready};
use std::sync::Arc;
use std::task::{Context, Poll};

use derive_builder::Builder;
use tokio_util::sync::CancellationToken;
use tonic::codegen::{Body, BoxFuture, Service, StdError};
use tonic::server::StreamingService;
use tonic::{Request, Status, Streaming};

use crate::ProxyError;
use crate::codec::{Frame, RawCodec};
use crate::director::{Director, Mode};
use crate::forward::{ForwardResponse, ForwardStream, one2many, one2one};

/// How a matched method is relayed. Only one-to-many calls care: unary
/// merges all backends into one response frame, streamed interleaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MethodKind {
    Unary,
    Streamed,
}

/// Explicit registration of one service.
#[derive(Debug, Clone, Builder)]
#[builder(pattern = "owned", setter(into))]
pub struct ServiceSpec {
    /// Fully qualified service name, e.g. `pkg.Service`.
    name: String,
    /// Method names to proxy; empty means every method of the service.
    #[builder(default, setter(each(name = "method", into)))]
    methods: Vec<String>,
    /// Subset of `methods` relayed as bidi streams. Anything else is
    /// unary-proxied: one request frame, one merged response frame.
    #[builder(default, setter(each(name = "streamed_method", into)))]
    streamed_methods: Vec<String>,
}

impl ServiceSpec {
    pub fn builder() -> ServiceSpecBuilder {
        ServiceSpecBuilder::default()
    }
}

#[derive(Debug)]
struct ServiceRoutes {
    /// `None` registers the whole service.
    methods: Option<HashSet<String>>,
    streamed: HashSet<String>,
}

#[derive(Debug, Default)]
struct Routes {
    transparent: bool,
    services: HashMap<String, ServiceRoutes>,
}

impl Routes {
    fn resolve(&self, path: &str) -> Option<MethodKind> {
        let (service, method) = split_method(path)?;

        if let Some(routes) = self.services.get(service) {
            let listed = routes
                .methods
                .as_ref()
                .map_or(true, |methods| methods.contains(method));
            if listed {
                return Some(if routes.streamed.contains(method) {
                    MethodKind::Streamed
                } else {
                    MethodKind::Unary
                });
            }
        }

        // Transparent methods merge as unary; streamed relaying must be
        // declared through an explicit registration.
        self.transparent.then_some(MethodKind::Unary)
    }
}

fn split_method(path: &str) -> Option<(&str, &str)> {
    let mut parts = path.strip_prefix('/')?.splitn(2, '/');
    let service = parts.next()?;
    let method = parts.next()?;
    (!service.is_empty() && !method.is_empty()).then_some((service, method))
}

/// Builder for [`Proxy`].
pub struct ProxyBuilder<D> {
    director: D,
    routes: Routes,
}

impl<D: Director> ProxyBuilder<D> {
    pub fn new(director: D) -> Self {
        Self {
            director,
            routes: Routes::default(),
        }
    }

    /// Proxies every method the route table does not know about, the
    /// equivalent of an unknown-service catch-all.
    pub fn transparent(mut self) -> Self {
        self.routes.transparent = true;
        self
    }

    /// Adds an explicit route for one service.
    pub fn register_service(mut self, spec: ServiceSpec) -> Self {
        let methods = if spec.methods.is_empty() {
            None
        } else {
            Some(spec.methods.into_iter().collect())
        };
        self.routes.services.insert(
            spec.name,
            ServiceRoutes {
                methods,
                streamed: spec.streamed_methods.into_iter().collect(),
            },
        );
        self
    }

    pub fn build(self) -> Proxy<D> {
        Proxy {
            director: Arc::new(self.director),
            routes: Arc::new(self.routes),
        }
    }
}

/// The proxy endpoint: a tower service accepting any gRPC request whose
/// method resolves through the route table.
pub struct Proxy<D> {
    director: Arc<D>,
    routes: Arc<Routes>,
}

impl<D> Clone for Proxy<D> {
    fn clone(&self) -> Self {
        Self {
            director: Arc::clone(&self.director),
            routes: Arc::clone(&self.routes),
        }
    }
}

impl<D: Director> Proxy<D> {
    pub fn builder(director: D) -> ProxyBuilder<D> {
        ProxyBuilder::new(director)
    }

    /// Wraps the proxy as an axum router with the proxy as the fallback, so
    /// it can be served directly or merged behind other routes.
    pub fn into_router(self) -> axum::Router {
        axum::Router::new().fallback_service(self)
    }
}

impl<D, B> Service<http::Request<B>> for Proxy<D>
where
    D: Director,
    B: Body + Send + 'static,
    B::Error: Into<StdError> + Send + 'static,
{
    type Response = http::Response<tonic::body::Body>;
    type Error = Infallible;
    type Future = BoxFuture<Self::Response, Self::Error>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let path = req.uri().path().to_owned();

        match self.routes.resolve(&path) {
            Some(kind) => {
                let handler = ForwardSvc {
                    director: Arc::clone(&self.director),
                    method: path,
                    kind,
                };
                Box::pin(async move {
                    let mut grpc = tonic::server::Grpc::new(RawCodec);
                    Ok(grpc.streaming(handler, req).await)
                })
            }
            None => {
                let status = Status::unimplemented(format!("unknown method {path}"));
                Box::pin(async move {
                    let mut grpc = tonic::server::Grpc::new(RawCodec);
                    Ok(grpc.streaming(RejectSvc(status), req).await)
                })
            }
        }
    }
}

/// Per-call handler: runs the director once, then hands the inbound stream
/// to the forwarder matching the chosen mode.
struct ForwardSvc<D> {
    director: Arc<D>,
    method: String,
    kind: MethodKind,
}

impl<D: Director> StreamingService<Frame> for ForwardSvc<D> {
    type Response = Frame;
    type ResponseStream = ForwardStream;
    type Future = BoxFuture<tonic::Response<Self::ResponseStream>, Status>;

    fn call(&mut self, request: Request<Streaming<Frame>>) -> Self::Future {
        let director = Arc::clone(&self.director);
        let method = self.method.clone();
        let kind = self.kind;
        Box::pin(async move { forward(director, method, kind, request).await })
    }
}

async fn forward<D: Director>(
    director: Arc<D>,
    method: String,
    kind: MethodKind,
    request: Request<Streaming<Frame>>,
) -> Result<ForwardResponse, Status> {
    let metadata = request.metadata().clone();
    let client = request.into_inner();

    // The single director invocation for this call; its error is the
    // call's status, with no sub-stream opened.
    let (mode, mut backends) = director.direct(&method, &metadata).await?;

    match mode {
        Mode::One2One => {
            if backends.len() != 1 {
                return Err(ProxyError::BackendCount(backends.len()).into());
            }
            let backend = backends.swap_remove(0);
            let token = CancellationToken::new();
            one2one::forward(backend, method, metadata, client, token).await
        }
        Mode::One2Many => {
            if backends.is_empty() {
                return Err(ProxyError::NoBackends.into());
            }
            match kind {
                MethodKind::Unary => {
                    one2many::forward_unary(backends, method, metadata, client).await
                }
                MethodKind::Streamed => {
                    let token = CancellationToken::new();
                    one2many::forward_streamed(backends, method, metadata, client, token).await
                }
            }
        }
    }
}

/// Terminates an unroutable call with the given status through the normal
/// gRPC response path.
struct RejectSvc(Status);

impl StreamingService<Frame> for RejectSvc {
    type Response = Frame;
    type ResponseStream = ForwardStream;
    type Future = Ready<Result<tonic::Response<Self::ResponseStream>, Status>>;

    fn call(&mut self, _request: Request<Streaming<Frame>>) -> Self::Future {
        ready(Err(self.0.clone()))
    }
}
