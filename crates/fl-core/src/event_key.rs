use sha2::{Digest, Sha256};

/// The key is the first 15 hex digits of the SHA-256 of
/// `resource_id:event_time:event_type:canonical_data`, so it is always
/// non-negative.
pub fn derive_event_key(
    resource_id: &str,
    event_time: i64,
    event_type: &str,
    canonical_data: &str,
) -> i64 {
    let digest = Sha256::digest(
        format!("{resource_id}:{event_time}:{event_type}:{canonical_data}").as_bytes(),
    );
    let encoded = hex::encode(digest);
    // 15 hex digits is 60 bits, which always fits.
    i64::from_str_radix(&encoded[..15], 16).unwrap_or_default()
}
