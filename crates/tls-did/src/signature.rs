//! Verification of identity record signatures against a leaf certificate key.

use openssl::{
	error::ErrorStack,
	hash::MessageDigest,
	pkey::{Id, PKey},
	sign::Verifier,
};

/// Checks a signature made by the private key matching a public key.
pub trait SignatureVerifier: std::fmt::Debug + Send + Sync + 'static {
	/// `public_key` is a DER encoded SubjectPublicKeyInfo. Returns `Ok(false)`
	/// when the signature is well formed but does not match.
	fn verify(
		&self,
		public_key: &[u8],
		signature: &[u8],
		message: &[u8],
	) -> Result<bool, SignatureError>;
}

/// Verifies RSA PKCS#1 v1.5 and ECDSA signatures over SHA-256, and EdDSA
/// signatures over the raw message.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpensslVerifier;

impl SignatureVerifier for OpensslVerifier {
	fn verify(
		&self,
		public_key: &[u8],
		signature: &[u8],
		message: &[u8],
	) -> Result<bool, SignatureError> {
		let key = PKey::public_key_from_der(public_key)?;
		if key.id() == Id::ED25519 || key.id() == Id::ED448 {
			let mut verifier = Verifier::new_without_digest(&key)?;
			return Ok(verifier.verify_oneshot(signature, message)?);
		}
		let mut verifier = Verifier::new(MessageDigest::sha256(), &key)?;
		verifier.update(message)?;
		Ok(verifier.verify(signature)?)
	}
}

/// Errors which may occur while processing keys and signatures.
#[derive(thiserror::Error, Debug)]
#[error("failed to process signature")]
pub struct SignatureError(#[from] ErrorStack);
