// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Director contract.

use std::sync::Arc;

use async_trait::async_trait;
use tonic::Status;
use tonic::metadata::MetadataMap;

use crate::backend::Backend;

/// Fan-out mode chosen by the [`Director`] for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Exactly one backend; status, headers and trailers pass through
    /// verbatim.
    One2One,
    /// N >= 1 backends; responses are merged and per-backend failures are
    /// encoded in-band via [`Backend::build_error`].
    One2Many,
}

/// Decides, per call, which backends to forward to and in which mode.
///
/// Invoked exactly once per call, before any sub-stream is opened. The
/// director is trusted: it may inspect the inbound metadata to authorize,
/// rewrite targets, or reject the call outright. A returned error becomes the
/// call's final status verbatim.
#[async_trait]
pub trait Director: Send + Sync + 'static {
    async fn direct(
        &self,
        method: &str,
        metadata: &MetadataMap,
    ) -> Result<(Mode, Vec<Arc<dyn Backend>>), Status>;
}

/// Adapts a plain closure into a [`Director`].
pub struct DirectorFn<F>(pub F);

#[async_trait]
impl<F> Director for DirectorFn<F>
where
    F: Fn(&str, &MetadataMap) -> Result<(Mode, Vec<Arc<dyn Backend>>), Status>
        + Send
        + Sync
        + 'static,
{
    async fn direct(
        &self,
        method: &str,
        metadata: &MetadataMap,
    ) -> Result<(Mode, Vec<Arc<dyn Backend>>), Status> {
        (self.0)(method, metadata)
    }
}
