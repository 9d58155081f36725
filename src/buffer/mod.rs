//! Typed message buffers.
//!
//! A [`Buffer`] owns at most one [`Region`]. A buffer without a region is
//! *null*; it reports an empty payload and can be provisioned lazily with
//! [`Buffer::alloc_default`].
//!
//! # Example
//!
//! ```
//! use tpwire::buffer::{Buffer, BufferType};
//!
//! let buf = Buffer::string("hello");
//! assert_eq!(buf.buffer_type(), Some(BufferType::String));
//! assert_eq!(buf.data(), b"hello");
//!
//! let empty = Buffer::new();
//! assert!(empty.is_null());
//! assert_eq!(empty.data_size(), 0);
//! ```

mod codec;
mod region;

pub use codec::{JsonCodec, RecordCodec};
pub use region::{BufferType, Region, DEFAULT_CAPACITY};

use crate::error::Result;

/// A typed message buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer {
    region: Option<Region>,
}

impl Buffer {
    /// Create a null buffer.
    #[inline]
    pub fn new() -> Self {
        Self { region: None }
    }

    /// Allocate an empty buffer of the given type.
    pub fn alloc(kind: BufferType, capacity: usize) -> Self {
        Self::from_region(Region::with_capacity(kind, capacity))
    }

    /// Wrap an existing region.
    #[inline]
    pub fn from_region(region: Region) -> Self {
        Self {
            region: Some(region),
        }
    }

    /// STRING buffer holding `text`.
    pub fn string(text: &str) -> Self {
        Self::from_region(Region::from_slice(BufferType::String, text.as_bytes()))
    }

    /// CARRAY buffer holding a copy of `data`.
    pub fn carray(data: &[u8]) -> Self {
        Self::from_region(Region::from_slice(BufferType::Carray, data))
    }

    /// XML buffer holding `document`.
    pub fn xml(document: &str) -> Self {
        Self::from_region(Region::from_slice(BufferType::Xml, document.as_bytes()))
    }

    /// JSON buffer holding the serialized `value`.
    pub fn json<T: serde::Serialize>(value: &T) -> Result<Self> {
        let data = JsonCodec::encode(value)?;
        Ok(Self::from_region(Region::from_slice(BufferType::Json, &data)))
    }

    /// RECORD buffer holding the serialized `value`.
    pub fn record<T: serde::Serialize>(value: &T) -> Result<Self> {
        let data = RecordCodec::encode(value)?;
        Ok(Self::from_region(Region::from_slice(BufferType::Record, &data)))
    }

    /// Whether the buffer has no region.
    #[inline]
    pub fn is_null(&self) -> bool {
        self.region.is_none()
    }

    /// Type tag, `None` for a null buffer.
    #[inline]
    pub fn buffer_type(&self) -> Option<BufferType> {
        self.region.as_ref().map(Region::kind)
    }

    /// Payload bytes (empty for a null buffer).
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.region.as_ref().map(Region::as_bytes).unwrap_or(&[])
    }

    /// Payload length.
    #[inline]
    pub fn data_size(&self) -> usize {
        self.region.as_ref().map(Region::len).unwrap_or(0)
    }

    /// Payload as UTF-8 text.
    pub fn as_str(&self) -> Result<&str> {
        Ok(std::str::from_utf8(self.data())?)
    }

    /// Decode a JSON payload.
    pub fn decode_json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        JsonCodec::decode(self.data())
    }

    /// Decode a RECORD payload.
    pub fn decode_record<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        RecordCodec::decode(self.data())
    }

    /// Borrow the region.
    #[inline]
    pub fn region(&self) -> Option<&Region> {
        self.region.as_ref()
    }

    /// Provision a default-typed region if the buffer is null.
    pub fn alloc_default(&mut self) -> &mut Region {
        self.region
            .get_or_insert_with(|| Region::with_capacity(BufferType::default(), DEFAULT_CAPACITY))
    }

    /// Hand the region out (to the transport). The buffer becomes null.
    #[inline]
    pub fn release(&mut self) -> Option<Region> {
        self.region.take()
    }

    /// Take ownership of a region (from the transport).
    #[inline]
    pub fn acquire(&mut self, region: Region) {
        self.region = Some(region);
    }
}

impl From<Region> for Buffer {
    fn from(region: Region) -> Self {
        Self::from_region(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[test]
    fn test_null_buffer() {
        let buf = Buffer::new();
        assert!(buf.is_null());
        assert_eq!(buf.buffer_type(), None);
        assert_eq!(buf.data(), b"");
        assert_eq!(buf.as_str().unwrap(), "");
    }

    #[test]
    fn test_alloc_default_is_lazy() {
        let mut buf = Buffer::new();
        let region = buf.alloc_default();
        assert_eq!(region.kind(), BufferType::Carray);
        region.fill(BufferType::String, b"kept");

        // Already provisioned: alloc_default must not reset the region.
        buf.alloc_default();
        assert_eq!(buf.data(), b"kept");
    }

    #[test]
    fn test_release_acquire() {
        let mut buf = Buffer::string("abc");
        let region = buf.release().unwrap();
        assert!(buf.is_null());
        assert!(buf.release().is_none());

        buf.acquire(region);
        assert_eq!(buf.as_str().unwrap(), "abc");
    }

    #[test]
    fn test_typed_constructors() {
        assert_eq!(Buffer::carray(&[1, 2]).buffer_type(), Some(BufferType::Carray));
        assert_eq!(Buffer::xml("<x/>").buffer_type(), Some(BufferType::Xml));

        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Order {
            sku: String,
            qty: u32,
        }

        let order = Order {
            sku: "A-1".to_string(),
            qty: 3,
        };

        let json = Buffer::json(&order).unwrap();
        assert_eq!(json.buffer_type(), Some(BufferType::Json));
        assert_eq!(json.decode_json::<Order>().unwrap(), order);

        let record = Buffer::record(&order).unwrap();
        assert_eq!(record.buffer_type(), Some(BufferType::Record));
        assert_eq!(record.decode_record::<Order>().unwrap(), order);
    }

    #[test]
    fn test_invalid_utf8() {
        let buf = Buffer::carray(&[0xff, 0xfe]);
        assert!(buf.as_str().is_err());
    }
}
