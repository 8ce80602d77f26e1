//! # Change Gate
//!
//! Decides whether downstream work has to run again by comparing a freshly
//! computed content hash with the hash recorded in status. The loop runs far
//! more often than configuration changes (every watched change, every resync),
//! so an unchanged hash must short-circuit any further writes.

/// True when nothing has been recorded yet or the hashes differ
pub fn needs_apply(new_hash: &str, status_hash: Option<&str>) -> bool {
    match status_hash {
        Some(recorded) => recorded != new_hash,
        None => true,
    }
}
