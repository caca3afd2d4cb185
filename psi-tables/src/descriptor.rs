//! Descriptor loops.
//!
//! Descriptors are kept as opaque `(tag, data)` records. Decoding a
//! descriptor body into something meaningful is left to a
//! [`DescriptorCodec`] supplied by the application.

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::error::PsiError;

/// Largest descriptor body (8-bit length field).
pub const MAX_DESCRIPTOR_DATA: usize = 255;

/// One descriptor: tag plus raw body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Descriptor {
    /// Descriptor tag.
    pub tag: u8,
    /// Descriptor body (without tag and length bytes).
    pub data: Vec<u8>,
}

impl Descriptor {
    /// Create a descriptor. Bodies longer than 255 bytes are cut at 255
    /// since the length field cannot express more.
    pub fn new(tag: u8, data: impl Into<Vec<u8>>) -> Self {
        let mut data = data.into();
        data.truncate(MAX_DESCRIPTOR_DATA);
        Descriptor { tag, data }
    }

    /// Size on the wire, tag and length included.
    pub fn encoded_len(&self) -> usize {
        2 + self.data.len().min(MAX_DESCRIPTOR_DATA)
    }
}

/// Parse a descriptor loop.
///
/// A descriptor whose declared length runs past the loop yields
/// `IncompletePayload`.
pub fn parse_descriptor_loop(data: &[u8]) -> Result<Vec<Descriptor>, PsiError> {
    let mut descriptors = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        if offset + 2 > data.len() {
            return Err(PsiError::IncompletePayload {
                expected: offset + 2,
                actual: data.len(),
            });
        }

        let tag = data[offset];
        let length = data[offset + 1] as usize;
        offset += 2;

        if offset + length > data.len() {
            return Err(PsiError::IncompletePayload {
                expected: offset + length,
                actual: data.len(),
            });
        }

        descriptors.push(Descriptor {
            tag,
            data: data[offset..offset + length].to_vec(),
        });
        offset += length;
    }

    Ok(descriptors)
}

/// Total wire size of a descriptor loop.
pub fn descriptors_len(descriptors: &[Descriptor]) -> usize {
    descriptors.iter().map(Descriptor::encoded_len).sum()
}

/// Append a descriptor loop to `buf` (no loop length prefix).
pub fn write_descriptor_loop<B: BufMut>(buf: &mut B, descriptors: &[Descriptor]) {
    for descriptor in descriptors {
        let data = &descriptor.data[..descriptor.data.len().min(MAX_DESCRIPTOR_DATA)];
        buf.put_u8(descriptor.tag);
        buf.put_u8(data.len() as u8);
        buf.put_slice(data);
    }
}

/// Find the first descriptor with the given tag.
pub fn find_descriptor(descriptors: &[Descriptor], tag: u8) -> Option<&Descriptor> {
    descriptors.iter().find(|d| d.tag == tag)
}

/// Per-tag descriptor body codec.
///
/// Implementations are stateless: `decode` maps a raw body to a semantic
/// value and `encode` maps it back. Unknown tags decode to `None`.
pub trait DescriptorCodec {
    /// Semantic descriptor value.
    type Decoded;

    /// Decode the body of a descriptor with `tag`.
    fn decode(&self, tag: u8, data: &[u8]) -> Option<Self::Decoded>;

    /// Encode a semantic value back into a descriptor.
    fn encode(&self, decoded: &Self::Decoded) -> Descriptor;

    /// Decode a raw descriptor record.
    fn decode_descriptor(&self, descriptor: &Descriptor) -> Option<Self::Decoded> {
        self.decode(descriptor.tag, &descriptor.data)
    }
}
