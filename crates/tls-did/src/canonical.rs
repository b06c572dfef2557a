//! The hash an identity record's signature is computed over.

use sha2::{Digest, Sha256};

use crate::{document::Attribute, registry::Address};

/// SHA-256 over `domain ‖ address ‖ (path ‖ value)* ‖ expiry`.
///
/// Attributes are hashed in the order they were retrieved, without sorting,
/// because that is the order the signer hashed them in. An unset expiry
/// contributes nothing, a set one contributes its decimal Unix seconds.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub struct CanonicalHash([u8; 32]);

impl CanonicalHash {
	pub fn compute(
		domain: &str,
		address: &Address,
		attributes: &[Attribute],
		expiry: Option<u64>,
	) -> Self {
		let mut hasher = Sha256::new();
		hasher.update(domain.as_bytes());
		hasher.update(address.as_str().as_bytes());
		for attribute in attributes {
			hasher.update(attribute.path.as_bytes());
			hasher.update(attribute.value.as_bytes());
		}
		if let Some(expiry) = expiry {
			hasher.update(expiry.to_string().as_bytes());
		}
		Self(hasher.finalize().into())
	}

	pub fn as_bytes(&self) -> &[u8; 32] {
		&self.0
	}

	/// The message that gets signed: the lowercase hex encoding of the hash.
	pub fn signing_message(&self) -> String {
		hex::encode(self.0)
	}
}
