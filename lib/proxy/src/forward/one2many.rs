// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! One-to-many forwarding: fan out one inbound call to N backends.
//!
//! Two merge policies, chosen by how the method was registered:
//!
//! - *unary-proxied*: one request frame in, one merged response frame out.
//!   Per-backend envelopes (real via `append_info`, synthesized via
//!   `build_error`) are concatenated in director order, which yields a valid
//!   repeated-field encoding of the union reply.
//! - *streamed*: every inbound frame is broadcast to all backends; response
//!   frames are interleaved onto the client stream as they arrive, each
//!   decorated by its backend's `append_info`. A failed backend contributes
//!   one `build_error` frame and its peers keep going.
//!
//! Either way the client call ends `OK`: per-backend outcomes travel in-band.

use std::sync::Arc;

use async_stream::try_stream;
use bytes::BytesMut;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::metadata::MetadataMap;
use tonic::{Code, Response, Status, Streaming};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::codec::Frame;
use crate::metadata;

use super::{
    ForwardResponse, ForwardStream, Substream, open_substream, spawn_client_pump, terminate,
};

/// What one backend produced for a unary-proxied call.
struct UnaryReply {
    headers: MetadataMap,
    frame: Frame,
    trailers: MetadataMap,
}

pub(crate) async fn forward_unary(
    backends: Vec<Arc<dyn Backend>>,
    method: String,
    metadata: MetadataMap,
    mut client: Streaming<Frame>,
) -> Result<ForwardResponse, Status> {
    let request = client
        .message()
        .await?
        .ok_or_else(|| Status::internal("no request message on unary-proxied call"))?;

    let calls = backends
        .iter()
        .map(|backend| call_backend(backend.as_ref(), &method, &metadata, request.clone()));
    let outcomes = futures::future::join_all(calls).await;

    let mut headers = MetadataMap::new();
    let mut trailers = MetadataMap::new();
    let mut body = BytesMut::new();

    // Director order throughout: header/trailer collisions resolve to the
    // last backend, and the concatenated envelopes keep the director's order.
    for (backend, outcome) in backends.iter().zip(outcomes) {
        let envelope = match outcome {
            Ok(reply) => {
                metadata::merge(&mut headers, &reply.headers);
                metadata::merge(&mut trailers, &reply.trailers);
                match backend.append_info(false, reply.frame) {
                    Ok(frame) => Some(frame),
                    Err(status) => {
                        warn!(backend = %backend, error = %status, "append_info failed");
                        synthesize(backend.as_ref(), false, &status)
                    }
                }
            }
            Err(status) => {
                debug!(backend = %backend, error = %status, "backend failed, encoding error in-band");
                synthesize(backend.as_ref(), false, &status)
            }
        };

        if let Some(envelope) = envelope {
            body.extend_from_slice(&envelope);
        }
    }

    let merged = body.freeze();
    let output = try_stream! {
        yield merged;
        terminate(Status::with_metadata(Code::Ok, "", trailers))?;
    };

    let mut response = Response::new(Box::pin(output) as ForwardStream);
    *response.metadata_mut() = headers;

    Ok(response)
}

/// One complete unary exchange with one backend: open, send the single
/// request frame, half-close, take the single response frame and trailers.
async fn call_backend(
    backend: &dyn Backend,
    method: &str,
    inbound: &MetadataMap,
    request: Frame,
) -> Result<UnaryReply, Status> {
    let (tx, rx) = mpsc::channel(1);
    tx.send(request)
        .await
        .map_err(|_| Status::internal("request buffer closed"))?;
    drop(tx);

    let sub = open_substream(backend, method, inbound, rx).await?;
    let mut stream = sub.stream;

    let frame = stream
        .message()
        .await?
        .ok_or_else(|| Status::internal(format!("backend {backend} sent no response message")))?;
    let trailers = stream.trailers().await?.unwrap_or_default();

    Ok(UnaryReply {
        headers: sub.headers,
        frame,
        trailers,
    })
}

/// Per-backend event on the shared merge channel.
enum Event {
    Headers(usize, MetadataMap),
    Frame(usize, Frame),
    Done(usize, Outcome),
}

enum Outcome {
    /// Clean end of stream, with whatever trailers the backend sent.
    Eof(Option<MetadataMap>),
    /// Connect or stream failure; encoded in-band, peers unaffected.
    Fail(Status),
}

pub(crate) async fn forward_streamed(
    backends: Vec<Arc<dyn Backend>>,
    method: String,
    metadata: MetadataMap,
    client: Streaming<Frame>,
    token: CancellationToken,
) -> Result<ForwardResponse, Status> {
    let count = backends.len();
    let (event_tx, event_rx) = mpsc::channel(count);

    let mut senders = Vec::with_capacity(count);
    for (index, backend) in backends.iter().enumerate() {
        // Capacity 1 per backend: a slow client back-pressures every
        // backend through the broadcast pump.
        let (tx, rx) = mpsc::channel(1);
        senders.push(tx);

        let backend = Arc::clone(backend);
        let events = event_tx.clone();
        let method = method.clone();
        let inbound = metadata.clone();
        let token = token.clone();

        tokio::spawn(async move {
            let outcome = relay_backend(&*backend, &method, &inbound, rx, index, &events, &token).await;
            let _ = events.send(Event::Done(index, outcome)).await;
        });
    }
    drop(event_tx);

    spawn_client_pump(client, senders, token.clone());

    let mut merge = Merge::new(backends);
    let mut events = event_rx;

    // Hold the response until the first client-visible frame exists, so the
    // single header flush covers every backend that answered by then.
    let mut first = None;
    while !merge.finished() {
        match events.recv().await {
            Some(event) => {
                if let Some(frame) = merge.on_event(event) {
                    first = Some(frame);
                    break;
                }
            }
            None => break,
        }
    }

    let headers = merge.headers.clone();
    let output = try_stream! {
        let _teardown = token.clone().drop_guard();

        if let Some(frame) = first {
            yield frame;
        }

        while !merge.finished() {
            let event = tokio::select! {
                _ = token.cancelled() => Err(Status::cancelled("inbound call cancelled")),
                event = events.recv() => Ok(event),
            };

            match event? {
                Some(event) => {
                    if let Some(frame) = merge.on_event(event) {
                        yield frame;
                    }
                }
                None => break,
            }
        }

        debug!(backends = merge.backends.len(), "fan-out drained, flushing trailers");
        terminate(Status::with_metadata(Code::Ok, "", merge.merged_trailers()))?;
    };

    let mut response = Response::new(Box::pin(output) as ForwardStream);
    *response.metadata_mut() = headers;

    Ok(response)
}

/// Drives one backend sub-stream and feeds the merge channel. Returns the
/// terminal outcome; the caller reports it as the `Done` event.
async fn relay_backend(
    backend: &dyn Backend,
    method: &str,
    inbound: &MetadataMap,
    frames: mpsc::Receiver<Frame>,
    index: usize,
    events: &mpsc::Sender<Event>,
    token: &CancellationToken,
) -> Outcome {
    let Substream {
        headers,
        mut stream,
    } = match open_substream(backend, method, inbound, frames).await {
        Ok(sub) => sub,
        Err(status) => return Outcome::Fail(status),
    };

    if events.send(Event::Headers(index, headers)).await.is_err() {
        return Outcome::Fail(Status::cancelled("call finished"));
    }

    loop {
        let message = tokio::select! {
            _ = token.cancelled() => return Outcome::Fail(Status::cancelled("inbound call cancelled")),
            message = stream.message() => message,
        };

        match message {
            Ok(Some(frame)) => {
                if events.send(Event::Frame(index, frame)).await.is_err() {
                    return Outcome::Fail(Status::cancelled("call finished"));
                }
            }
            Ok(None) => {
                let trailers = stream.trailers().await.ok().flatten();
                return Outcome::Eof(trailers);
            }
            Err(status) => return Outcome::Fail(status),
        }
    }
}

/// Merge state shared by the pre-flush loop and the response stream: header
/// union, per-backend trailers, and the count of still-live backends.
struct Merge {
    backends: Vec<Arc<dyn Backend>>,
    headers: MetadataMap,
    trailers: Vec<Option<MetadataMap>>,
    live: usize,
}

impl Merge {
    fn new(backends: Vec<Arc<dyn Backend>>) -> Self {
        let live = backends.len();
        Self {
            trailers: vec![None; backends.len()],
            backends,
            headers: MetadataMap::new(),
            live,
        }
    }

    fn finished(&self) -> bool {
        self.live == 0
    }

    /// Folds one event in; returns a frame when there is one to emit.
    fn on_event(&mut self, event: Event) -> Option<Frame> {
        match event {
            Event::Headers(_, md) => {
                // Only headers observed before the first frame make the
                // flush; merging later ones is harmless, they are never read.
                metadata::merge(&mut self.headers, &md);
                None
            }
            Event::Frame(index, frame) => {
                let backend = &self.backends[index];
                match backend.append_info(true, frame) {
                    Ok(frame) => Some(frame),
                    Err(status) => {
                        warn!(backend = %backend, error = %status, "append_info failed");
                        self.synthesize(index, &status)
                    }
                }
            }
            Event::Done(index, outcome) => {
                self.live -= 1;
                match outcome {
                    Outcome::Eof(trailers) => {
                        self.trailers[index] = trailers;
                        None
                    }
                    Outcome::Fail(status) => {
                        debug!(
                            backend = %self.backends[index],
                            error = %status,
                            "backend failed, encoding error in-band",
                        );
                        self.trailers[index] = Some(status.metadata().clone());
                        self.synthesize(index, &status)
                    }
                }
            }
        }
    }

    fn synthesize(&self, index: usize, status: &Status) -> Option<Frame> {
        synthesize(self.backends[index].as_ref(), true, status)
    }

    /// Trailer union in director order, last writer wins.
    fn merged_trailers(&self) -> MetadataMap {
        let mut merged = MetadataMap::new();
        for trailers in self.trailers.iter().flatten() {
            metadata::merge(&mut merged, trailers);
        }
        merged
    }
}

fn synthesize(backend: &dyn Backend, streaming: bool, status: &Status) -> Option<Frame> {
    match backend.build_error(streaming, status) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(backend = %backend, error = %err, "build_error failed, dropping backend output");
            None
        }
    }
}
