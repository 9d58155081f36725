//! Typed byte region handed back and forth with the transport.

use std::fmt;

use bytes::BytesMut;

/// Default capacity for regions provisioned on demand.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Type tag of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferType {
    /// UTF-8 text.
    String,
    /// Opaque bytes.
    #[default]
    Carray,
    /// XML document text.
    Xml,
    /// JSON document.
    Json,
    /// Structured record (named MsgPack map).
    Record,
}

impl BufferType {
    /// Native type name.
    pub fn name(self) -> &'static str {
        match self {
            BufferType::String => "STRING",
            BufferType::Carray => "CARRAY",
            BufferType::Xml => "XML",
            BufferType::Json => "JSON",
            BufferType::Record => "RECORD",
        }
    }

    /// Parse a native type name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "STRING" => Some(BufferType::String),
            "CARRAY" => Some(BufferType::Carray),
            "XML" => Some(BufferType::Xml),
            "JSON" => Some(BufferType::Json),
            "RECORD" => Some(BufferType::Record),
            _ => None,
        }
    }
}

impl fmt::Display for BufferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed, resizable byte region.
///
/// This is the unit of ownership exchanged with the transport: a
/// [`Buffer`](super::Buffer) releases its region before a transport call and
/// acquires it back afterwards. The transport may resize and re-type it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    kind: BufferType,
    bytes: BytesMut,
}

impl Region {
    /// Create an empty region with the given type and capacity.
    pub fn with_capacity(kind: BufferType, capacity: usize) -> Self {
        Self {
            kind,
            bytes: BytesMut::with_capacity(capacity),
        }
    }

    /// Create a region holding a copy of `data`.
    pub fn from_slice(kind: BufferType, data: &[u8]) -> Self {
        Self {
            kind,
            bytes: BytesMut::from(data),
        }
    }

    /// Type tag.
    #[inline]
    pub fn kind(&self) -> BufferType {
        self.kind
    }

    /// Re-type the region.
    #[inline]
    pub fn set_kind(&mut self, kind: BufferType) {
        self.kind = kind;
    }

    /// Payload bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable access to the payload.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.bytes
    }

    /// Payload length.
    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the payload is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Drop the payload, keeping type and capacity.
    #[inline]
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Overwrite type and payload with a copy of `data`.
    pub fn fill(&mut self, kind: BufferType, data: &[u8]) {
        self.kind = kind;
        self.bytes.clear();
        self.bytes.extend_from_slice(data);
    }

    /// Overwrite this region with the contents of another one.
    ///
    /// When `keep_type` is set the type tag is left alone (`NOCHANGE`).
    pub fn fill_from(&mut self, other: &Region, keep_type: bool) {
        let kind = if keep_type { self.kind } else { other.kind };
        self.fill(kind, other.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names() {
        for kind in [
            BufferType::String,
            BufferType::Carray,
            BufferType::Xml,
            BufferType::Json,
            BufferType::Record,
        ] {
            assert_eq!(BufferType::from_name(kind.name()), Some(kind));
        }
        assert_eq!(BufferType::from_name("FML32"), None);
        assert_eq!(BufferType::default(), BufferType::Carray);
    }

    #[test]
    fn test_fill_retypes() {
        let mut region = Region::with_capacity(BufferType::Carray, 16);
        assert!(region.is_empty());

        region.fill(BufferType::String, b"hello");
        assert_eq!(region.kind(), BufferType::String);
        assert_eq!(region.as_bytes(), b"hello");

        region.clear();
        assert!(region.is_empty());
        assert_eq!(region.kind(), BufferType::String);
    }

    #[test]
    fn test_fill_from_nochange() {
        let source = Region::from_slice(BufferType::Xml, b"<a/>");
        let mut target = Region::with_capacity(BufferType::Carray, 0);

        target.fill_from(&source, true);
        assert_eq!(target.kind(), BufferType::Carray);
        assert_eq!(target.as_bytes(), b"<a/>");

        target.fill_from(&source, false);
        assert_eq!(target.kind(), BufferType::Xml);
    }
}
