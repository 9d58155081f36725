//! Encoders for the structured buffer types.
//!
//! RECORD buffers use `rmp_serde::to_vec_named` so that records travel as
//! maps keyed by field name. Positional encoding would break peers that add
//! or reorder fields. JSON buffers use `serde_json`.

use crate::error::Result;

/// Codec for RECORD buffers.
pub struct RecordCodec;

impl RecordCodec {
    /// Encode a value as a named MsgPack map.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode a value from MsgPack bytes.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Codec for JSON buffers.
pub struct JsonCodec;

impl JsonCodec {
    /// Encode a value as JSON text.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Decode a value from JSON text.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TpwireError;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Account {
        id: u32,
        owner: String,
        balance: i64,
    }

    #[test]
    fn test_record_is_named_map() {
        let account = Account {
            id: 7,
            owner: "ops".to_string(),
            balance: -20,
        };

        let encoded = RecordCodec::encode(&account).unwrap();
        // 0x83 = fixmap with 3 entries
        assert_eq!(encoded[0], 0x83);

        let decoded: Account = RecordCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, account);
    }

    #[test]
    fn test_record_decode_wrong_shape() {
        let encoded = RecordCodec::encode(&"just a string").unwrap();
        let result: Result<Account> = RecordCodec::decode(&encoded);
        assert!(matches!(result, Err(TpwireError::MsgPackDecode(_))));
    }

    #[test]
    fn test_json_text() {
        let account = Account {
            id: 1,
            owner: "a".to_string(),
            balance: 0,
        };

        let encoded = JsonCodec::encode(&account).unwrap();
        assert_eq!(
            std::str::from_utf8(&encoded).unwrap(),
            r#"{"id":1,"owner":"a","balance":0}"#
        );

        let decoded: Account = JsonCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, account);
    }

    #[test]
    fn test_json_invalid() {
        let result: Result<Account> = JsonCodec::decode(b"{not json");
        assert!(matches!(result, Err(TpwireError::Json(_))));
    }
}
