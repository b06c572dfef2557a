//! The set of root certificates that resolution trusts.

use tracing::warn;
use x509_parser::{certificate::X509Certificate, x509::SubjectPublicKeyInfo};

use crate::{
	chain::Certificate,
	jwk::{CURVE_P256, CURVE_P384, EC_PUBLIC_KEY, ED25519, RSA_ENCRYPTION},
};

/// An immutable set of trusted root certificates.
///
/// Built once per resolution with [`TrustAnchorStore::build`]. Roots that do
/// not parse, or whose key cannot verify signatures, are left out. That shrinks
/// trust but never fails the build. Usable keys are RSA, ECDSA on P-256 or
/// P-384, and Ed25519.
#[derive(Debug, Clone, Default)]
pub struct TrustAnchorStore {
	anchors: Vec<Anchor>,
}

#[derive(Debug, Clone)]
struct Anchor {
	cert: Certificate,
	/// Raw DER of the subject name, compared against issuer names.
	subject: Vec<u8>,
}

impl TrustAnchorStore {
	/// Parses every root. Returns the store along with the indices of `roots`
	/// that were skipped.
	pub fn build<S: AsRef<str>>(roots: &[S]) -> (Self, Vec<usize>) {
		let mut anchors = Vec::with_capacity(roots.len());
		let mut skipped = Vec::new();
		for (idx, root) in roots.iter().enumerate() {
			match parse_anchor(root.as_ref()) {
				Ok(anchor) => anchors.push(anchor),
				Err(reason) => {
					warn!(idx, %reason, "skipping trust anchor");
					skipped.push(idx);
				}
			}
		}
		(Self { anchors }, skipped)
	}

	pub fn len(&self) -> usize {
		self.anchors.len()
	}

	pub fn is_empty(&self) -> bool {
		self.anchors.is_empty()
	}

	/// Finds the anchor with the subject and public key of `cert`. Re-issued or
	/// cross-signed copies of an anchor match too.
	pub fn find_equivalent(&self, cert: &X509Certificate<'_>) -> Option<&Certificate> {
		let subject = cert.subject().as_raw();
		let key = cert.public_key().raw;
		self.anchors
			.iter()
			.find(|a| a.subject == subject && a.cert.public_key_der() == key)
			.map(|a| &a.cert)
	}

	/// Finds the anchor that issued `cert`: its subject must equal the issuer
	/// of `cert`, and its key must verify the signature on `cert`.
	pub fn find_issuer(&self, cert: &X509Certificate<'_>) -> Option<&Certificate> {
		let issuer = cert.issuer().as_raw();
		self.anchors
			.iter()
			.filter(|a| a.subject == issuer)
			.find(|a| match a.cert.x509() {
				Ok(anchor) => cert.verify_signature(Some(anchor.public_key())).is_ok(),
				Err(_) => false,
			})
			.map(|a| &a.cert)
	}
}

fn parse_anchor(pem: &str) -> Result<Anchor, String> {
	let cert = Certificate::from_pem(pem).map_err(|err| err.to_string())?;
	let subject = {
		let x509 = cert.x509().map_err(|err| err.to_string())?;
		check_key_algorithm(x509.public_key())?;
		x509.subject().as_raw().to_vec()
	};
	Ok(Anchor { cert, subject })
}

fn check_key_algorithm(spki: &SubjectPublicKeyInfo<'_>) -> Result<(), String> {
	let algorithm = spki.algorithm.algorithm.to_id_string();
	match algorithm.as_str() {
		RSA_ENCRYPTION => spki
			.parsed()
			.map(|_| ())
			.map_err(|err| format!("malformed RSA key: {err}")),
		ED25519 => Ok(()),
		EC_PUBLIC_KEY => {
			let curve = spki
				.algorithm
				.parameters
				.as_ref()
				.and_then(|params| params.as_oid().ok())
				.map(|oid| oid.to_id_string())
				.unwrap_or_default();
			match curve.as_str() {
				CURVE_P256 | CURVE_P384 => Ok(()),
				_ => Err(format!("unsupported elliptic curve {curve:?}")),
			}
		}
		_ => Err(format!("unsupported key algorithm {algorithm}")),
	}
}
