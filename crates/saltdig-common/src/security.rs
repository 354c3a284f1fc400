//! Timing-safe comparison for shared secrets.

use subtle::ConstantTimeEq;

/// Compare two byte strings in constant time.
///
/// Both inputs are padded to a common length before comparison so that
/// neither content nor length differences short-circuit. Use this for
/// every secret the process receives over the wire (reconciler cron
/// secret, API keys).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    let max_len = a.len().max(b.len());
    let mut a_padded = vec![0u8; max_len];
    let mut b_padded = vec![0u8; max_len];
    a_padded[..a.len()].copy_from_slice(a);
    b_padded[..b.len()].copy_from_slice(b);

    let lengths_equal = a.len().ct_eq(&b.len());
    let contents_equal = a_padded.ct_eq(&b_padded);

    (lengths_equal & contents_equal).into()
}
