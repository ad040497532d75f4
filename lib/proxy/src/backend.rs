// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Backend contract.
//!
//! A [`Backend`] is one upstream destination for a proxied call. It owns the
//! schema-aware parts the proxy refuses to know about: how to reach the
//! upstream, which metadata to carry on the sub-stream, and how to decorate
//! response frames with per-backend provenance when several upstreams are
//! merged onto one client stream.

use std::fmt;

use async_trait::async_trait;
use tonic::Status;
use tonic::metadata::MetadataMap;
use tonic::transport::Channel;

use crate::codec::Frame;
use crate::metadata;

/// One upstream destination, selected per call by the
/// [`Director`](crate::Director).
///
/// Implementations are shared across concurrent calls behind an `Arc`; the
/// underlying [`Channel`] is multiplexed and may outlive any single call. The
/// proxy never closes it.
#[async_trait]
pub trait Backend: fmt::Display + Send + Sync + 'static {
    /// Returns the channel to open the sub-stream on and the metadata to
    /// carry on it, typically the inbound metadata run through
    /// [`metadata::bridge`].
    ///
    /// Failures here are surfaced as the call status in one-to-one mode and
    /// converted into a [`build_error`](Backend::build_error) frame in
    /// one-to-many mode.
    async fn get_connection(
        &self,
        method: &str,
        inbound: &MetadataMap,
    ) -> Result<(MetadataMap, Channel), Status>;

    /// Decorates one response frame with this backend's provenance.
    ///
    /// With `streaming == true` the frame is a bare message and new fields are
    /// appended after it. With `streaming == false` the frame is the top-level
    /// envelope of a unary reply: the outermost length-delimited field is
    /// extended so that concatenating the envelopes of several backends yields
    /// one valid merged reply.
    fn append_info(&self, streaming: bool, frame: Frame) -> Result<Frame, Status>;

    /// Synthesizes a response frame describing a failure of this backend, with
    /// the same shape [`append_info`](Backend::append_info) produces for a
    /// real response, so the merged reply stays schema-valid.
    fn build_error(&self, streaming: bool, status: &Status) -> Result<Frame, Status>;
}

/// Ready-made [`Backend`] for the plain one-to-one case: forwards the bridged
/// inbound metadata onto a fixed channel and leaves frames untouched.
pub struct SingleBackend {
    channel: Channel,
}

impl SingleBackend {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Backend for SingleBackend {
    async fn get_connection(
        &self,
        _method: &str,
        inbound: &MetadataMap,
    ) -> Result<(MetadataMap, Channel), Status> {
        Ok((metadata::bridge(inbound), self.channel.clone()))
    }

    fn append_info(&self, _streaming: bool, frame: Frame) -> Result<Frame, Status> {
        // No fan-out, nothing to disambiguate.
        Ok(frame)
    }

    fn build_error(&self, _streaming: bool, status: &Status) -> Result<Frame, Status> {
        Err(status.clone())
    }
}

impl fmt::Display for SingleBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("single")
    }
}
