// Canonical certificate encoding.
//
// The signed message is the certificate's fields (signature excluded)
// serialized as compact JSON with lexicographically sorted keys in UTF-8.
// Two encodings of the same field values are byte-identical, so signer and
// verifier never need to exchange anything beyond the record itself.

use crate::CoreResult;
use serde::Serialize;

/// Deterministically encode `value` for signing or signature verification.
///
/// Relies on `serde_json`'s default map representation (a BTreeMap) for the
/// sorted-key guarantee; the `preserve_order` feature must stay off.
pub fn canonical_bytes<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let tree = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&tree)?)
}
