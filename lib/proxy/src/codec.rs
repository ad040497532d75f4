// SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Passthrough codec for proxied streams.
//!
//! The proxy never re-serializes messages: a [`Frame`] is one wire message,
//! already length-prefixed by the transport, carried as raw bytes. [`RawCodec`]
//! hands those bytes to tonic unchanged in both directions. It is passed
//! explicitly to every proxy-side `server::Grpc`/`client::Grpc` and must never
//! be installed on an endpoint that terminates typed RPCs.

use bytes::{Buf, BufMut, Bytes};
use tonic::Status;
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};

/// One RPC message on the wire, opaque to the proxy.
pub type Frame = Bytes;

/// Identity codec: `Frame` in, `Frame` out, no schema involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawCodec;

impl Codec for RawCodec {
    type Encode = Frame;
    type Decode = Frame;

    type Encoder = RawEncoder;
    type Decoder = RawDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        RawEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        RawDecoder
    }
}

/// Writes a frame into the transport buffer verbatim.
#[derive(Debug)]
pub struct RawEncoder;

impl Encoder for RawEncoder {
    type Item = Frame;
    type Error = Status;

    fn encode(&mut self, item: Frame, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item);
        Ok(())
    }
}

/// Takes the full length-delimited message out of the transport buffer verbatim.
#[derive(Debug)]
pub struct RawDecoder;

impl Decoder for RawDecoder {
    type Item = Frame;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        // tonic hands us exactly one complete message per call.
        let len = src.remaining();
        Ok(Some(src.copy_to_bytes(len)))
    }
}
