// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Metadata bridge between the inbound call and its sub-streams.

use tonic::metadata::MetadataMap;

/// Headers owned by the HTTP/2 + gRPC transport layer. The sub-stream opener
/// regenerates these; forwarding the inbound values would either duplicate
/// them or advertise capabilities (compression codings) the proxy cannot
/// honor on a verbatim frame relay. `grpc-timeout` is deliberately absent:
/// it carries the inbound deadline onto the sub-stream.
const TRANSPORT_HEADERS: &[&str] = &[
    "te",
    "content-type",
    "content-length",
    "host",
    "connection",
    "user-agent",
    "grpc-encoding",
    "grpc-accept-encoding",
];

/// Copies inbound metadata for use on a sub-stream, dropping transport-owned
/// headers. ASCII and binary (`-bin`) values are preserved verbatim.
pub fn bridge(inbound: &MetadataMap) -> MetadataMap {
    let mut headers = inbound.clone().into_headers();
    for name in TRANSPORT_HEADERS {
        headers.remove(*name);
    }
    MetadataMap::from_headers(headers)
}

/// Merges `src` into `dst`: for every key present in `src`, the destination
/// values are replaced by the source values (last writer wins), keeping
/// multi-valued keys intact within one source map.
pub fn merge(dst: &mut MetadataMap, src: &MetadataMap) {
    let mut headers = std::mem::take(dst).into_headers();
    let src_headers = src.clone().into_headers();
    for name in src_headers.keys() {
        headers.remove(name);
    }
    for (name, value) in src_headers.iter() {
        headers.append(name.clone(), value.clone());
    }
    *dst = MetadataMap::from_headers(headers);
}
