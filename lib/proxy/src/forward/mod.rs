// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Streaming forwarder: the bidirectional pumps relaying opaque frames
//! between the inbound call and one or more backend sub-streams.

use std::pin::Pin;

use futures::Stream;
use http::uri::PathAndQuery;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::{Request, Status, Streaming};
use tracing::debug;

use crate::ProxyError;
use crate::backend::Backend;
use crate::codec::{Frame, RawCodec};

pub(crate) mod one2many;
pub(crate) mod one2one;

/// The response stream handed back to the server half of the proxy. Ends
/// with an `Err` status carrying the final trailers (code `Ok` on success).
pub(crate) type ForwardStream = Pin<Box<dyn Stream<Item = Result<Frame, Status>> + Send>>;

pub(crate) type ForwardResponse = tonic::Response<ForwardStream>;

/// Ends a forward stream with an explicit status; `Ok`-coded statuses carry
/// the final trailers.
pub(crate) fn terminate(status: Status) -> Result<Frame, Status> {
    Err(status)
}

/// One open backend sub-stream: the response headers observed when the call
/// resolved, and the raw response frame stream.
pub(crate) struct Substream {
    pub headers: MetadataMap,
    pub stream: Streaming<Frame>,
}

/// Opens the raw bidi sub-stream for `method` on the backend's channel,
/// feeding it request frames from `frames`. Resolves once the backend has
/// sent its response headers.
pub(crate) async fn open_substream(
    backend: &dyn Backend,
    method: &str,
    inbound: &MetadataMap,
    frames: mpsc::Receiver<Frame>,
) -> Result<Substream, Status> {
    let (outgoing, channel) = backend.get_connection(method, inbound).await?;

    let mut grpc = tonic::client::Grpc::new(channel);
    grpc.ready()
        .await
        .map_err(|err| Status::unavailable(format!("backend {backend} not ready: {err}")))?;

    let path = PathAndQuery::from_maybe_shared(method.as_bytes().to_vec())
        .map_err(|_| Status::from(ProxyError::InvalidMethod(method.to_owned())))?;

    let mut request = Request::new(ReceiverStream::new(frames));
    *request.metadata_mut() = outgoing;

    debug!(backend = %backend, method, "opening backend sub-stream");

    let response = grpc.streaming(request, path, RawCodec).await?;
    let headers = response.metadata().clone();

    Ok(Substream {
        headers,
        stream: response.into_inner(),
    })
}

/// The client-to-server pump: relays every inbound frame to every live
/// backend send half, in director order. Dropping the send halves on client
/// EOF is what half-closes every sub-stream, exactly once. An inbound stream
/// error cancels the whole call.
pub(crate) fn spawn_client_pump(
    mut client: Streaming<Frame>,
    senders: Vec<mpsc::Sender<Frame>>,
    token: CancellationToken,
) {
    tokio::spawn(async move {
        let mut senders: Vec<Option<mpsc::Sender<Frame>>> =
            senders.into_iter().map(Some).collect();

        loop {
            let message = tokio::select! {
                _ = token.cancelled() => return,
                message = client.message() => message,
            };

            match message {
                Ok(Some(frame)) => {
                    for slot in senders.iter_mut() {
                        if let Some(tx) = slot
                            && tx.send(frame.clone()).await.is_err()
                        {
                            // Backend gone; keep feeding the others.
                            *slot = None;
                        }
                    }
                }
                Ok(None) => return,
                Err(status) => {
                    debug!(error = %status, "inbound stream failed, cancelling call");
                    token.cancel();
                    return;
                }
            }
        }
    });
}
