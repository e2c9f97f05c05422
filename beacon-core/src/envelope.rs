//! Wire envelope exchanged with agents, and the padding frame.
//!
//! The envelope is a protobuf message. Protobuf has no framing header, so
//! decoding two encodings concatenated back to back is the same as merging
//! the two messages: singular fields keep the last non-default value and
//! repeated fields append. A padding frame only sets the repeated `padding`
//! field, which makes it safe to write any number of them before or after a
//! real envelope on a streamed response. Decoders ignore `padding`.
//!
//! ```text
//! 200 OK (chunked)
//! ├── [pad] [pad] [pad]          keep-alive while dispatch runs (post)
//! └── [real envelope]            the dispatch result
//! ```

use std::sync::LazyLock;

use bytes::Bytes;
use prost::Message;

/// Encrypted message envelope as seen on the wire.
///
/// Only the framing-relevant shape lives here; the cipher fields are opaque
/// to this layer and are produced/consumed by the external crypto pipeline.
#[derive(Clone, PartialEq, Message)]
pub struct CommsEnvelope {
    /// Claimed sender identifier (unauthenticated until decrypted).
    #[prost(string, tag = "1")]
    pub source: String,

    /// Session cipher, encrypted to the receiver.
    #[prost(bytes = "vec", tag = "2")]
    pub cipher: Vec<u8>,

    /// Signed cipher metadata.
    #[prost(bytes = "vec", tag = "3")]
    pub cipher_metadata: Vec<u8>,

    /// Encrypted message payload.
    #[prost(bytes = "vec", tag = "4")]
    pub payload: Vec<u8>,

    /// Initialisation vector for `payload`.
    #[prost(bytes = "vec", tag = "5")]
    pub iv: Vec<u8>,

    /// Protocol version spoken by the sender.
    #[prost(uint32, tag = "6")]
    pub api_version: u32,

    /// Ignored filler. Only ever populated by padding frames.
    #[prost(uint64, repeated, tag = "7")]
    pub padding: Vec<u64>,
}

impl CommsEnvelope {
    /// Decode a response stream: one real envelope plus any number of
    /// padding frames, in any order.
    pub fn decode_stream(buf: &[u8]) -> Result<Self, prost::DecodeError> {
        let mut envelope = Self::decode(buf)?;
        envelope.padding.clear();
        Ok(envelope)
    }
}

static PADDING_FRAME: LazyLock<Bytes> = LazyLock::new(|| {
    let pad = CommsEnvelope {
        padding: vec![0],
        ..Default::default()
    };
    Bytes::from(pad.encode_to_vec())
});

/// The pre-serialized padding frame.
///
/// Cloning the returned `Bytes` is a reference-count bump.
pub fn padding_frame() -> Bytes {
    PADDING_FRAME.clone()
}
