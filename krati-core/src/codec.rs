//! Value codecs for Krati stores and retentions.
//!
//! The storage engine moves opaque byte strings; the codec belongs to the
//! caller. A [`Serializer`] converts between an application value type and
//! its byte representation, and every implementation must be total on
//! non-null inputs: `deserialize(serialize(v)) == v`.

use bytes::Bytes;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Bidirectional converter between a value type and bytes.
///
/// Implementations must be `Send + Sync` so they can be shared by writers
/// and readers across tasks.
pub trait Serializer<T>: Send + Sync {
    /// Encodes a value to bytes.
    ///
    /// # Errors
    /// Returns an error if the value cannot be represented.
    fn serialize(&self, value: &T) -> CodecResult<Bytes>;

    /// Decodes a value from bytes.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a valid encoding.
    fn deserialize(&self, bytes: &[u8]) -> CodecResult<T>;
}

/// UTF-8 codec for `String` values.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Serializer;

impl Utf8Serializer {
    /// Creates a new UTF-8 serializer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<String> for Utf8Serializer {
    fn serialize(&self, value: &String) -> CodecResult<Bytes> {
        Ok(Bytes::copy_from_slice(value.as_bytes()))
    }

    fn deserialize(&self, bytes: &[u8]) -> CodecResult<String> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| CodecError::Malformed {
                type_name: "String",
                message: e.to_string(),
            })
    }
}

/// Identity codec for values that are already bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytesSerializer;

impl BytesSerializer {
    /// Creates a new identity serializer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Serializer<Bytes> for BytesSerializer {
    fn serialize(&self, value: &Bytes) -> CodecResult<Bytes> {
        Ok(value.clone())
    }

    fn deserialize(&self, bytes: &[u8]) -> CodecResult<Bytes> {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

/// Codec errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The bytes are not a valid encoding of the target type.
    Malformed {
        /// The target type name.
        type_name: &'static str,
        /// Why decoding failed.
        message: String,
    },
    /// The encoded value exceeds a configured limit.
    ValueTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed { type_name, message } => {
                write!(f, "malformed {type_name}: {message}")
            }
            Self::ValueTooLarge { size, max } => {
                write!(f, "encoded value too large: {size} > {max}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_roundtrip() {
        let codec = Utf8Serializer::new();
        let value = "value.8c6b1e0a".to_owned();

        let bytes = codec.serialize(&value).unwrap();
        let decoded = codec.deserialize(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_utf8_rejects_invalid() {
        let codec = Utf8Serializer::new();
        let result: CodecResult<String> = codec.deserialize(&[0xFF, 0xFE]);
        assert!(matches!(result, Err(CodecError::Malformed { .. })));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let codec = BytesSerializer::new();
        let value = Bytes::from_static(b"\x00\x01binary");

        let bytes = codec.serialize(&value).unwrap();
        let decoded = codec.deserialize(&bytes).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_error_display() {
        let err = CodecError::ValueTooLarge { size: 10, max: 5 };
        assert_eq!(format!("{err}"), "encoded value too large: 10 > 5");
    }
}
