//! Request fingerprinting for deterministic snapshot keys

use sha2::{Digest, Sha256};

use crate::canonical::CanonicalRequest;

/// Length of a hex-encoded fingerprint
pub const FINGERPRINT_LEN: usize = 64;

/// Compute the SHA-256 fingerprint of a canonical request
///
/// The fingerprint covers, in this order:
/// 1. Host
/// 2. Pathname
/// 3. Href
/// 4. Method
/// 5. Headers (sorted by name)
/// 6. Body
///
/// Every field is length-prefixed, so `("ab", "c")` and `("a", "bc")` never
/// hash alike.
#[must_use]
pub fn fingerprint(request: &CanonicalRequest) -> String {
    hex::encode(fingerprint_bytes(request))
}

/// Raw digest behind [`fingerprint`]
#[must_use]
pub fn fingerprint_bytes(request: &CanonicalRequest) -> [u8; 32] {
    let mut hasher = Sha256::new();

    update_field(&mut hasher, request.host.as_bytes());
    update_field(&mut hasher, request.pathname.as_bytes());
    update_field(&mut hasher, request.href.as_bytes());
    update_field(&mut hasher, request.method.as_bytes());

    // BTreeMap iterates in key order
    hasher.update((request.headers.len() as u64).to_le_bytes());
    for (name, value) in &request.headers {
        update_field(&mut hasher, name.as_bytes());
        update_field(&mut hasher, value.as_bytes());
    }

    update_field(&mut hasher, &request.body);

    hasher.finalize().into()
}

fn update_field(hasher: &mut Sha256, data: &[u8]) {
    hasher.update((data.len() as u64).to_le_bytes());
    hasher.update(data);
}
