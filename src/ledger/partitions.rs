/// Key layout and encoding utilities for Fjall partitions
///
/// Partition structure:
/// - `sources`: source:{id} -> Source (JSON)
/// - `products`: product:{id} -> Product (JSON)
/// - `deliveries`: delivery:{id} -> Delivery (JSON)
/// - `files`: file:{id} -> File (JSON)
/// - `downloads`: download:{file_id}\0{seq:be64} -> DownloadEntry (JSON)
/// - `webhooks`: webhook:{id:be64} -> Webhook (JSON)
/// - `metadata`: meta:{key} -> u64 (big-endian)
///
/// File ids contain `:` separators, so download keys use a NUL byte between
/// the file id and the sequence to keep prefix scans exact.

const DOWNLOAD_PREFIX: &[u8] = b"download:";
const WEBHOOK_PREFIX: &[u8] = b"webhook:";

/// Encode a source key: source:{id}
pub fn encode_source_key(id: &str) -> Vec<u8> {
    format!("source:{}", id).into_bytes()
}

/// Encode a product key: product:{id}
pub fn encode_product_key(id: &str) -> Vec<u8> {
    format!("product:{}", id).into_bytes()
}

/// Encode a delivery key: delivery:{id}
pub fn encode_delivery_key(id: &str) -> Vec<u8> {
    format!("delivery:{}", id).into_bytes()
}

/// Encode a file key: file:{id}
pub fn encode_file_key(id: &str) -> Vec<u8> {
    format!("file:{}", id).into_bytes()
}

/// Encode a download prefix for range scan: download:{file_id}\0
pub fn encode_download_prefix(file_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(DOWNLOAD_PREFIX.len() + file_id.len() + 1);
    key.extend_from_slice(DOWNLOAD_PREFIX);
    key.extend_from_slice(file_id.as_bytes());
    key.push(0);
    key
}

/// Encode a download key: download:{file_id}\0{seq}
pub fn encode_download_key(file_id: &str, seq: u64) -> Vec<u8> {
    let mut key = encode_download_prefix(file_id);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

/// Decode a download key into (file_id, seq)
pub fn decode_download_key(key: &[u8]) -> Option<(String, u64)> {
    let rest = key.strip_prefix(DOWNLOAD_PREFIX)?;
    if rest.len() < 9 {
        return None;
    }
    let (id_part, seq_part) = rest.split_at(rest.len() - 8);
    let id_part = id_part.strip_suffix(&[0])?;
    let file_id = std::str::from_utf8(id_part).ok()?.to_string();
    let seq = u64::from_be_bytes(seq_part.try_into().ok()?);
    Some((file_id, seq))
}

/// Encode a webhook key: webhook:{id}
pub fn encode_webhook_key(id: u64) -> Vec<u8> {
    let mut key = WEBHOOK_PREFIX.to_vec();
    key.extend_from_slice(&id.to_be_bytes());
    key
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_key_encoding() {
        assert_eq!(encode_source_key("epo"), b"source:epo");
        assert_eq!(encode_product_key("epo:14"), b"product:epo:14");
        assert_eq!(encode_delivery_key("epo:14:2024"), b"delivery:epo:14:2024");
        assert_eq!(encode_file_key("epo:14:2024:a"), b"file:epo:14:2024:a");
    }

    #[test]
    fn test_download_key_roundtrip() {
        let key = encode_download_key("epo:14:2024:a", 42);
        let (file_id, seq) = decode_download_key(&key).unwrap();
        assert_eq!(file_id, "epo:14:2024:a");
        assert_eq!(seq, 42);
    }

    #[test]
    fn test_download_prefix_does_not_match_longer_ids() {
        let prefix = encode_download_prefix("p:d:f");
        let other = encode_download_key("p:d:f:extra", 1);
        assert!(!other.starts_with(&prefix));
        assert!(encode_download_key("p:d:f", 1).starts_with(&prefix));
    }

    #[test]
    fn test_download_keys_sort_by_sequence() {
        let first = encode_download_key("f", 9);
        let second = encode_download_key("f", 10);
        assert!(first < second);
    }

    #[test]
    fn test_meta_key_encoding() {
        assert_eq!(encode_meta_key("next_download_seq"), b"meta:next_download_seq");
    }
}
