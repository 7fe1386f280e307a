// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Control-message serde: small structured payloads exchanged between
//! cooperating execution stages, wrapped in a versioned, codec-tagged,
//! length-prefixed envelope.
//!
//! Envelope layout (bit-exact):
//!
//! ```text
//! byte 0     : format version
//! byte 1     : codec tag (0 = uncompressed, 1 = zlib)
//! bytes 2..5 : payload length, u32 big-endian
//! bytes 6..  : payload (codec-encoded bytes of the underlying message)
//! ```
//!
//! Messages on the performance-critical path get a dedicated compact binary
//! body; ad hoc control data goes through the self-describing JSON fallback.

use std::io::{Read, Write};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ArbalestError, Result};
use crate::execution_id::{FragmentHandle, QueryId};

/// Current control envelope format version
pub const FORMAT_VERSION: u8 = 1;

const ENVELOPE_HEADER_LEN: usize = 6;

/// Compression scheme applied to an envelope payload, identified on the wire
/// by the codec tag byte. The tag set is closed: any value outside it fails
/// deserialization with [ArbalestError::UnsupportedCodec].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCodec {
    /// Payload bytes are the message body verbatim
    None,
    /// Payload bytes are the zlib-compressed message body
    Zlib,
}

impl ControlCodec {
    /// Wire tag for this codec
    pub fn tag(&self) -> u8 {
        match self {
            ControlCodec::None => 0,
            ControlCodec::Zlib => 1,
        }
    }

    /// Resolve a wire tag, rejecting anything outside the known set
    pub fn try_from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(ControlCodec::None),
            1 => Ok(ControlCodec::Zlib),
            other => Err(ArbalestError::UnsupportedCodec(other)),
        }
    }
}

/// A message kind with a dedicated compact binary body layout. The expected
/// kind is chosen by the caller through the type parameter of
/// [ControlMessageSerde::deserialize]; a body that does not decode as the
/// requested kind is a deserialization error.
pub trait ControlMessage: Sized {
    fn encode_body(&self, buf: &mut BytesMut);
    fn decode_body(buf: &mut Bytes) -> Result<Self>;
}

/// Address of one minor fragment within the cluster: which parallel instance
/// and which node (by index into the executing endpoint list) runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorFragmentEndpoint {
    pub minor_fragment_id: u32,
    pub endpoint_index: u32,
}

impl MinorFragmentEndpoint {
    pub fn new(minor_fragment_id: u32, endpoint_index: u32) -> Self {
        Self {
            minor_fragment_id,
            endpoint_index,
        }
    }
}

/// Ordered list of minor fragment addresses, e.g. the receivers of one
/// exchange. Element order is part of the message and survives round trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorFragmentEndpointList {
    pub endpoints: Vec<MinorFragmentEndpoint>,
}

fn read_u32(buf: &mut Bytes, field: &str) -> Result<u32> {
    if buf.remaining() < 4 {
        return Err(ArbalestError::Deserialization(format!(
            "truncated control message: missing {}",
            field
        )));
    }
    Ok(buf.get_u32())
}

fn read_u64(buf: &mut Bytes, field: &str) -> Result<u64> {
    if buf.remaining() < 8 {
        return Err(ArbalestError::Deserialization(format!(
            "truncated control message: missing {}",
            field
        )));
    }
    Ok(buf.get_u64())
}

impl ControlMessage for MinorFragmentEndpoint {
    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.minor_fragment_id);
        buf.put_u32(self.endpoint_index);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        let minor_fragment_id = read_u32(buf, "minor_fragment_id")?;
        let endpoint_index = read_u32(buf, "endpoint_index")?;
        Ok(Self {
            minor_fragment_id,
            endpoint_index,
        })
    }
}

impl ControlMessage for MinorFragmentEndpointList {
    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.endpoints.len() as u32);
        for endpoint in &self.endpoints {
            endpoint.encode_body(buf);
        }
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        let len = read_u32(buf, "endpoint count")? as usize;
        // each entry is 8 bytes; a count the body cannot hold is malformed
        if buf.remaining() < len * 8 {
            return Err(ArbalestError::Deserialization(format!(
                "endpoint list claims {} entries but only {} bytes remain",
                len,
                buf.remaining()
            )));
        }
        let mut endpoints = Vec::with_capacity(len);
        for _ in 0..len {
            endpoints.push(MinorFragmentEndpoint::decode_body(buf)?);
        }
        Ok(Self { endpoints })
    }
}

impl ControlMessage for FragmentHandle {
    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u64(self.query_id.part1);
        buf.put_u64(self.query_id.part2);
        buf.put_u32(self.major_fragment_id);
        buf.put_u32(self.minor_fragment_id);
    }

    fn decode_body(buf: &mut Bytes) -> Result<Self> {
        let part1 = read_u64(buf, "query_id.part1")?;
        let part2 = read_u64(buf, "query_id.part2")?;
        let major_fragment_id = read_u32(buf, "major_fragment_id")?;
        let minor_fragment_id = read_u32(buf, "minor_fragment_id")?;
        Ok(Self {
            query_id: QueryId::new(part1, part2),
            major_fragment_id,
            minor_fragment_id,
        })
    }
}

/// Serializer/deserializer for control messages crossing a process boundary.
/// Stateless apart from the codec chosen at construction, which applies to
/// the encode side only; the decode side honors whatever tag the envelope
/// carries.
#[derive(Debug, Clone)]
pub struct ControlMessageSerde {
    codec: ControlCodec,
}

impl ControlMessageSerde {
    pub fn new(codec: ControlCodec) -> Self {
        Self { codec }
    }

    /// Encode a message body and wrap it in the control envelope
    pub fn serialize<M: ControlMessage>(&self, message: &M) -> Result<Bytes> {
        let mut body = BytesMut::new();
        message.encode_body(&mut body);
        self.wrap(&body)
    }

    /// Validate the envelope and decode the payload as the requested kind
    pub fn deserialize<M: ControlMessage>(&self, data: &[u8]) -> Result<M> {
        let mut body = self.unwrap(data)?;
        let message = M::decode_body(&mut body)?;
        if body.has_remaining() {
            return Err(ArbalestError::Deserialization(format!(
                "{} trailing bytes after control message body",
                body.remaining()
            )));
        }
        Ok(message)
    }

    /// Generic fallback path: serialize an ad hoc structured value as a
    /// self-describing JSON payload inside the same envelope. Not for the
    /// performance-critical path.
    pub fn serialize_json<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        let body = serde_json::to_vec(value)?;
        self.wrap(&body)
    }

    /// Generic fallback path: decode a JSON payload into the target kind
    pub fn deserialize_json<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        let body = self.unwrap(data)?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn wrap(&self, body: &[u8]) -> Result<Bytes> {
        let payload = match self.codec {
            ControlCodec::None => Bytes::copy_from_slice(body),
            ControlCodec::Zlib => compress(body)?,
        };
        if payload.len() > u32::MAX as usize {
            return Err(ArbalestError::Internal(format!(
                "control payload of {} bytes exceeds the envelope length field",
                payload.len()
            )));
        }
        let mut out = BytesMut::with_capacity(ENVELOPE_HEADER_LEN + payload.len());
        out.put_u8(FORMAT_VERSION);
        out.put_u8(self.codec.tag());
        out.put_u32(payload.len() as u32);
        out.put_slice(&payload);
        Ok(out.freeze())
    }

    fn unwrap(&self, data: &[u8]) -> Result<Bytes> {
        if data.len() < ENVELOPE_HEADER_LEN {
            return Err(ArbalestError::Deserialization(format!(
                "control envelope of {} bytes is shorter than its header",
                data.len()
            )));
        }
        let version = data[0];
        if version != FORMAT_VERSION {
            return Err(ArbalestError::Deserialization(format!(
                "unsupported control envelope version {}",
                version
            )));
        }
        let codec = ControlCodec::try_from_tag(data[1])?;
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&data[2..ENVELOPE_HEADER_LEN]);
        let declared_len = u32::from_be_bytes(len_bytes) as usize;
        let payload = &data[ENVELOPE_HEADER_LEN..];
        if payload.len() != declared_len {
            return Err(ArbalestError::Deserialization(format!(
                "control payload length mismatch: header declares {} bytes, {} present",
                declared_len,
                payload.len()
            )));
        }
        match codec {
            ControlCodec::None => Ok(Bytes::copy_from_slice(payload)),
            ControlCodec::Zlib => decompress(payload),
        }
    }
}

fn compress(body: &[u8]) -> Result<Bytes> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(body.len()), Compression::default());
    encoder.write_all(body)?;
    Ok(Bytes::from(encoder.finish()?))
}

fn decompress(payload: &[u8]) -> Result<Bytes> {
    let mut decoder = ZlibDecoder::new(payload);
    let mut body = Vec::new();
    decoder.read_to_end(&mut body).map_err(|e| {
        ArbalestError::Deserialization(format!("corrupt compressed control payload: {}", e))
    })?;
    Ok(Bytes::from(body))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn serdes() -> Vec<ControlMessageSerde> {
        vec![
            ControlMessageSerde::new(ControlCodec::None),
            ControlMessageSerde::new(ControlCodec::Zlib),
        ]
    }

    #[test]
    fn endpoint_round_trip() {
        for serde in serdes() {
            let message = MinorFragmentEndpoint::new(16, 8);
            let buffer = serde.serialize(&message).unwrap();
            let decoded: MinorFragmentEndpoint = serde.deserialize(&buffer).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn endpoint_list_round_trip() {
        for serde in serdes() {
            let message = MinorFragmentEndpointList {
                endpoints: (1..8).map(|x| MinorFragmentEndpoint::new(x, x * 2)).collect(),
            };
            let buffer = serde.serialize(&message).unwrap();
            let decoded: MinorFragmentEndpointList = serde.deserialize(&buffer).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn empty_endpoint_list_round_trip() {
        let serde = ControlMessageSerde::new(ControlCodec::None);
        let message = MinorFragmentEndpointList { endpoints: vec![] };
        let buffer = serde.serialize(&message).unwrap();
        let decoded: MinorFragmentEndpointList = serde.deserialize(&buffer).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn fragment_handle_round_trip() {
        for serde in serdes() {
            let message = FragmentHandle::new(QueryId::new(u64::MAX, 7), 3, 12);
            let buffer = serde.serialize(&message).unwrap();
            let decoded: FragmentHandle = serde.deserialize(&buffer).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn envelope_layout_is_bit_exact() {
        let serde = ControlMessageSerde::new(ControlCodec::None);
        let buffer = serde.serialize(&MinorFragmentEndpoint::new(1, 2)).unwrap();
        assert_eq!(buffer[0], FORMAT_VERSION);
        assert_eq!(buffer[1], 0); // uncompressed tag
        assert_eq!(&buffer[2..6], &[0, 0, 0, 8]); // 8-byte payload, big-endian
        assert_eq!(&buffer[6..], &[0, 0, 0, 1, 0, 0, 0, 2]);
    }

    #[test]
    fn zlib_envelope_carries_tag_one() {
        let serde = ControlMessageSerde::new(ControlCodec::Zlib);
        let message = MinorFragmentEndpointList {
            endpoints: (0..64).map(|x| MinorFragmentEndpoint::new(x, 1)).collect(),
        };
        let buffer = serde.serialize(&message).unwrap();
        assert_eq!(buffer[1], 1);
        let decoded: MinorFragmentEndpointList = serde.deserialize(&buffer).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn unknown_codec_tag_never_decodes() {
        let serde = ControlMessageSerde::new(ControlCodec::None);
        let mut buffer = serde
            .serialize(&MinorFragmentEndpoint::new(1, 2))
            .unwrap()
            .to_vec();
        buffer[1] = 99;
        let err = serde
            .deserialize::<MinorFragmentEndpoint>(&buffer)
            .unwrap_err();
        assert!(matches!(err, ArbalestError::UnsupportedCodec(99)));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let serde = ControlMessageSerde::new(ControlCodec::None);
        let mut buffer = serde
            .serialize(&MinorFragmentEndpoint::new(1, 2))
            .unwrap()
            .to_vec();
        buffer[0] = 2;
        let err = serde
            .deserialize::<MinorFragmentEndpoint>(&buffer)
            .unwrap_err();
        assert!(matches!(err, ArbalestError::Deserialization(_)));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let serde = ControlMessageSerde::new(ControlCodec::None);
        let buffer = serde.serialize(&MinorFragmentEndpoint::new(1, 2)).unwrap();
        let err = serde
            .deserialize::<MinorFragmentEndpoint>(&buffer[..buffer.len() - 1])
            .unwrap_err();
        assert!(matches!(err, ArbalestError::Deserialization(_)));
    }

    #[test]
    fn short_envelope_is_rejected() {
        let serde = ControlMessageSerde::new(ControlCodec::None);
        let err = serde
            .deserialize::<MinorFragmentEndpoint>(&[FORMAT_VERSION, 0, 0])
            .unwrap_err();
        assert!(matches!(err, ArbalestError::Deserialization(_)));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let serde = ControlMessageSerde::new(ControlCodec::None);
        // a fragment handle body is 24 bytes; an endpoint only consumes 8
        let buffer = serde
            .serialize(&FragmentHandle::new(QueryId::new(1, 2), 3, 4))
            .unwrap();
        let err = serde
            .deserialize::<MinorFragmentEndpoint>(&buffer)
            .unwrap_err();
        assert!(matches!(err, ArbalestError::Deserialization(_)));
    }

    #[test]
    fn endpoint_list_with_lying_count_is_rejected() {
        let serde = ControlMessageSerde::new(ControlCodec::None);
        let mut body = BytesMut::new();
        body.put_u32(1000); // claims 1000 entries, provides one
        MinorFragmentEndpoint::new(1, 2).encode_body(&mut body);
        let buffer = serde.wrap(&body).unwrap();
        let err = serde
            .deserialize::<MinorFragmentEndpointList>(&buffer)
            .unwrap_err();
        assert!(matches!(err, ArbalestError::Deserialization(_)));
    }

    #[test]
    fn corrupt_zlib_payload_is_rejected() {
        let serde = ControlMessageSerde::new(ControlCodec::Zlib);
        let mut buffer = serde
            .serialize(&MinorFragmentEndpoint::new(1, 2))
            .unwrap()
            .to_vec();
        let last = buffer.len() - 1;
        buffer[last] ^= 0xff;
        let err = serde
            .deserialize::<MinorFragmentEndpoint>(&buffer)
            .unwrap_err();
        assert!(matches!(err, ArbalestError::Deserialization(_)));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct ScanSplit {
        path: String,
        offsets: Vec<u64>,
        row_group: Option<u32>,
    }

    #[test]
    fn json_fallback_round_trip() {
        for serde in serdes() {
            let value = ScanSplit {
                path: "warehouse/orders/part-00042.parquet".to_string(),
                offsets: vec![0, 4096, 8192],
                row_group: Some(3),
            };
            let buffer = serde.serialize_json(&value).unwrap();
            let decoded: ScanSplit = serde.deserialize_json(&buffer).unwrap();
            assert_eq!(decoded, value);
        }
    }

    #[test]
    fn json_fallback_rejects_wrong_shape() {
        let serde = ControlMessageSerde::new(ControlCodec::None);
        let buffer = serde.serialize_json(&vec![1, 2, 3]).unwrap();
        let err = serde.deserialize_json::<ScanSplit>(&buffer).unwrap_err();
        assert!(matches!(err, ArbalestError::Deserialization(_)));
    }
}
