// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! One-to-one forwarding: a single backend, verbatim passthrough.
//!
//! Status, headers and trailers reach the client exactly as the backend
//! produced them; frames are never decorated.

use std::sync::Arc;

use async_stream::try_stream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::{Code, Response, Status, Streaming};

use crate::backend::Backend;
use crate::codec::Frame;

use super::{ForwardResponse, ForwardStream, open_substream, spawn_client_pump, terminate};

pub(crate) async fn forward(
    backend: Arc<dyn Backend>,
    method: String,
    metadata: MetadataMap,
    client: Streaming<Frame>,
    token: CancellationToken,
) -> Result<ForwardResponse, Status> {
    let (tx, rx) = mpsc::channel(1);
    spawn_client_pump(client, vec![tx], token.clone());

    // A failure to reach the backend is the call's final status, verbatim.
    let sub = open_substream(backend.as_ref(), &method, &metadata, rx).await?;
    let mut stream = sub.stream;

    let output = try_stream! {
        let _teardown = token.clone().drop_guard();

        loop {
            let message = tokio::select! {
                _ = token.cancelled() => Err(Status::cancelled("inbound call cancelled")),
                message = stream.message() => message,
            };

            match message? {
                Some(frame) => yield frame,
                None => break,
            }
        }

        // Backend finished cleanly: relay its trailers on an OK status.
        let trailers = stream.trailers().await?.unwrap_or_default();
        terminate(Status::with_metadata(Code::Ok, "", trailers))?;
    };

    let mut response = Response::new(Box::pin(output) as ForwardStream);
    *response.metadata_mut() = sub.headers;

    Ok(response)
}
