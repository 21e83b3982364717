use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Hash identifying one logical change of a node's dominant trace.
///
/// Two writes with the same node, trace id and update time hash equal, which
/// is what notification de-duplication keys on.
pub fn trace_hash(node_id: &str, trace_id: &str, last_update: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(node_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(trace_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(last_update.timestamp_millis().to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Seconds between two instants, formatted with two decimals.
///
/// Negative spans (clock skew, reordered payloads) clamp to zero.
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let millis = (to - from).num_milliseconds().max(0);
    format!("{:.2}", millis as f64 / 1000.0)
}
