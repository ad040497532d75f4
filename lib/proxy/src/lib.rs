// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Transparent gRPC proxy with director-driven fan-out.
//!
//! The proxy terminates inbound gRPC calls, asks a user-supplied [`Director`]
//! which backends should serve the call and in which [`Mode`], then relays
//! the opaque frame stream between the client and the chosen backends without
//! decoding message bodies:
//!
//! - **One2One** forwards to exactly one backend; headers, trailers and
//!   status pass through verbatim.
//! - **One2Many** fans out to N backends and merges their responses onto the
//!   single client stream. Every relayed frame is decorated with per-backend
//!   provenance through [`Backend::append_info`], and per-backend failures
//!   are encoded in-band through [`Backend::build_error`] — the client call
//!   itself ends `OK`.
//!
//! Message bytes are never re-serialized: [`RawCodec`] passes frames through
//! unchanged, so the proxy needs no knowledge of any service's schema.
//!
//! ```rust,ignore
//! let proxy = Proxy::builder(director)
//!     .transparent()
//!     .register_service(
//!         ServiceSpec::builder()
//!             .name("pkg.Service")
//!             .method("Get")
//!             .method("Watch")
//!             .streamed_method("Watch")
//!             .build()?,
//!     )
//!     .build();
//! axum::serve(listener, proxy.into_router()).await?;
//! ```

pub mod backend;
pub mod codec;
pub mod director;
pub mod metadata;
pub mod server;

mod forward;

pub use backend::{Backend, SingleBackend};
pub use codec::{Frame, RawCodec};
pub use director::{Director, DirectorFn, Mode};
pub use server::{Proxy, ProxyBuilder, ServiceSpec, ServiceSpecBuilder};

use tonic::Status;

/// Invariant violations inside the proxy itself. These surface to the client
/// as `Internal` statuses; everything user- or backend-originated travels as
/// a plain [`Status`] instead.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("one-to-one call requires exactly one backend, got {0}")]
    BackendCount(usize),

    #[error("one-to-many call requires at least one backend")]
    NoBackends,

    #[error("malformed method path: {0}")]
    InvalidMethod(String),
}

impl From<ProxyError> for Status {
    fn from(err: ProxyError) -> Self {
        Status::internal(err.to_string())
    }
}
