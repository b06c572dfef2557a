use std::collections::BTreeSet;

use jose_jwk::Jwk;
use x509_parser::{
	prelude::FromDer, public_key::PublicKey, x509::SubjectPublicKeyInfo,
};

use crate::chain::Certificate;

pub(crate) const RSA_ENCRYPTION: &str = "1.2.840.113549.1.1.1";
pub(crate) const EC_PUBLIC_KEY: &str = "1.2.840.10045.2.1";
pub(crate) const ED25519: &str = "1.3.101.112";

pub(crate) const CURVE_P256: &str = "1.2.840.10045.3.1.7";
pub(crate) const CURVE_P384: &str = "1.3.132.0.34";
pub(crate) const CURVE_P521: &str = "1.3.132.0.35";

/// Creates a verification-only JWK from the public key of `cert`.
pub fn public_jwk(cert: &Certificate) -> Result<Jwk, JwkError> {
	spki_jwk(cert.public_key_der())
}

/// Creates a verification-only JWK from a DER encoded SubjectPublicKeyInfo.
/// Supports RSA, NIST P-256/P-384/P-521 and Ed25519 keys.
pub fn spki_jwk(spki_der: &[u8]) -> Result<Jwk, JwkError> {
	let (_, spki) =
		SubjectPublicKeyInfo::from_der(spki_der).map_err(|_| JwkError::MalformedKey)?;
	let algorithm = spki.algorithm.algorithm.to_id_string();
	let key_bytes: &[u8] = spki.subject_public_key.data.as_ref();

	let key: jose_jwk::Key = match algorithm.as_str() {
		RSA_ENCRYPTION => {
			let Ok(PublicKey::RSA(rsa)) = spki.parsed() else {
				return Err(JwkError::MalformedKey);
			};
			jose_jwk::Rsa {
				n: strip_leading_zeros(rsa.modulus).to_owned().into(),
				e: strip_leading_zeros(rsa.exponent).to_owned().into(),
				prv: None,
			}
			.into()
		}
		EC_PUBLIC_KEY => {
			let curve = spki
				.algorithm
				.parameters
				.as_ref()
				.and_then(|params| params.as_oid().ok())
				.map(|oid| oid.to_id_string())
				.ok_or(JwkError::MalformedKey)?;
			let (crv, coordinate_len) = match curve.as_str() {
				CURVE_P256 => (jose_jwk::EcCurves::P256, 32),
				CURVE_P384 => (jose_jwk::EcCurves::P384, 48),
				CURVE_P521 => (jose_jwk::EcCurves::P521, 66),
				_ => return Err(JwkError::UnsupportedCurve(curve)),
			};
			// Only the uncompressed SEC1 form, 0x04 ‖ x ‖ y.
			let point = match key_bytes.split_first() {
				Some((0x04, point)) if point.len() == 2 * coordinate_len => point,
				_ => return Err(JwkError::MalformedKey),
			};
			let (x, y) = point.split_at(coordinate_len);
			jose_jwk::Ec {
				crv,
				x: x.to_owned().into(),
				y: y.to_owned().into(),
				d: None,
			}
			.into()
		}
		ED25519 => {
			if key_bytes.len() != 32 {
				return Err(JwkError::MalformedKey);
			}
			jose_jwk::Okp {
				crv: jose_jwk::OkpCurves::Ed25519,
				x: key_bytes.to_owned().into(),
				d: None,
			}
			.into()
		}
		_ => return Err(JwkError::UnsupportedAlgorithm(algorithm)),
	};

	Ok(Jwk {
		key,
		prm: jose_jwk::Parameters {
			ops: Some(BTreeSet::from([jose_jwk::Operations::Verify])),
			..Default::default()
		},
	})
}

/// JWK integers are unsigned big endian without leading zero octets.
fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
	let start = bytes
		.iter()
		.position(|&b| b != 0)
		.unwrap_or(bytes.len().saturating_sub(1));
	&bytes[start..]
}

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum JwkError {
	#[error("public key is not a well formed SubjectPublicKeyInfo")]
	MalformedKey,
	#[error("unsupported public key algorithm {0}")]
	UnsupportedAlgorithm(String),
	#[error("unsupported elliptic curve {0}")]
	UnsupportedCurve(String),
}
