// Shared bincode 2.0 layer for wire payloads and stored records
use crate::error::{NodeError, Result};
use serde::{Deserialize, Serialize};

/// Decoding never claims more than this many bytes, so a forged length
/// prefix inside a record fails instead of allocating
pub const DECODE_LIMIT: usize = 32 * 1024 * 1024;

/// Serialize data using bincode 2.0 with standard configuration
pub fn serialize<T: Serialize + bincode::Encode>(data: &T) -> Result<Vec<u8>> {
    let config = bincode::config::standard();
    bincode::encode_to_vec(data, config)
        .map_err(|e| NodeError::Serialization(format!("Serialization failed: {e}")))
}

/// Deserialize data using bincode 2.0 with standard configuration.
///
/// Trailing bytes after the decoded value are rejected so a truncated or
/// padded payload never decodes silently.
pub fn deserialize<T>(bytes: &[u8]) -> Result<T>
where
    T: for<'de> Deserialize<'de> + bincode::Decode<()>,
{
    let config = bincode::config::standard().with_limit::<DECODE_LIMIT>();
    let (data, read) = bincode::decode_from_slice(bytes, config)
        .map_err(|e| NodeError::Decode(format!("Deserialization failed: {e}")))?;
    if read != bytes.len() {
        return Err(NodeError::Decode(format!(
            "Deserialization left {} trailing bytes",
            bytes.len() - read
        )));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, bincode::Encode, bincode::Decode)]
    struct TestData {
        id: u64,
        name: String,
        values: Vec<i32>,
    }

    #[test]
    fn test_serialize_deserialize() {
        let original = TestData {
            id: 42,
            name: "test".to_string(),
            values: vec![1, 2, 3, 4, 5],
        };

        let serialized = serialize(&original).expect("Serialization should work");
        let deserialized: TestData = deserialize(&serialized).expect("Deserialization should work");

        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_deserialize_invalid_data() {
        let invalid_bytes = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<TestData> = deserialize(&invalid_bytes);
        assert!(matches!(result, Err(NodeError::Decode(_))));
    }

    #[test]
    fn test_deserialize_rejects_oversized_length() {
        // name length varint claims 2^40 bytes
        let mut bytes = vec![42u8, 253];
        bytes.extend_from_slice(&(1u64 << 40).to_le_bytes());
        let result: Result<TestData> = deserialize(&bytes);
        assert!(matches!(result, Err(NodeError::Decode(_))));
    }

    #[test]
    fn test_deserialize_rejects_trailing_bytes() {
        let mut bytes = serialize(&7u64).unwrap();
        bytes.push(0);
        let result: Result<u64> = deserialize(&bytes);
        assert!(result.is_err());
    }
}
