//! Operation codec contract
//!
//! The journal stores opaque byte frames; turning a client operation into
//! bytes and back is the client's job, supplied through the [`Codec`] trait.
//! The round trip must be exact: `decode(encode(x)) == Some(x)` for every
//! `x` the client will push. A `None` from `decode` is a permanent parse
//! failure and is treated as fatal during replay.

/// Encodes and decodes one operation to and from a byte buffer.
pub trait Codec: Send + Sync + 'static {
    /// The operation type carried through the journal.
    type Item;

    /// Encode one operation. Total: every pushable item must encode.
    fn encode(&self, item: &Self::Item) -> Vec<u8>;

    /// Decode one operation, or `None` on a permanent parse failure.
    fn decode(&self, bytes: &[u8]) -> Option<Self::Item>;
}

/// Identity codec over raw byte vectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    type Item = Vec<u8>;

    fn encode(&self, item: &Vec<u8>) -> Vec<u8> {
        item.clone()
    }

    fn decode(&self, bytes: &[u8]) -> Option<Vec<u8>> {
        Some(bytes.to_vec())
    }
}

/// UTF-8 string codec. Decoding rejects invalid UTF-8.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringCodec;

impl Codec for StringCodec {
    type Item = String;

    fn encode(&self, item: &String) -> Vec<u8> {
        item.as_bytes().to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Option<String> {
        String::from_utf8(bytes.to_vec()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_round_trip() {
        let codec = BytesCodec;
        let item = vec![0u8, 1, 2, 255];
        assert_eq!(codec.decode(&codec.encode(&item)), Some(item));
    }

    #[test]
    fn string_round_trip() {
        let codec = StringCodec;
        let item = "hello journal".to_string();
        assert_eq!(codec.decode(&codec.encode(&item)), Some(item));
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        let codec = StringCodec;
        assert_eq!(codec.decode(&[0xff, 0xfe]), None);
    }
}
