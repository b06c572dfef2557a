//! Splitting of concatenated PEM blobs into certificate chains.
//!
//! The ledger stores each chain as one string: the leaf certificate first,
//! followed by intermediates, ending with the certificate closest to the root.

use std::collections::HashSet;

use sha2::{Digest, Sha256};
use x509_parser::{
	certificate::X509Certificate, error::X509Error, pem::parse_x509_pem,
	prelude::FromDer,
};

/// Marks the start of every PEM encoded certificate.
pub const BEGIN_MARKER: &str = "-----BEGIN CERTIFICATE-----";

/// Splits `blob` immediately before each [`BEGIN_MARKER`], preserving order and
/// every byte of the input. No validation is performed: text preceding the
/// first marker becomes its own element.
pub fn split(blob: &str) -> Vec<String> {
	if blob.is_empty() {
		return Vec::new();
	}
	let mut starts: Vec<usize> =
		blob.match_indices(BEGIN_MARKER).map(|(idx, _)| idx).collect();
	if starts.first() != Some(&0) {
		starts.insert(0, 0);
	}
	starts
		.iter()
		.enumerate()
		.map(|(i, &start)| {
			let end = starts.get(i + 1).copied().unwrap_or(blob.len());
			blob[start..end].to_owned()
		})
		.collect()
}

/// Removes duplicate chain blobs, keeping the first occurrence of each.
///
/// Equality is exact string equality over the whole blob, so two chains that
/// differ only in whitespace are both kept.
pub fn dedupe(chains: impl IntoIterator<Item = String>) -> Vec<String> {
	let mut seen = HashSet::new();
	chains
		.into_iter()
		.filter(|chain| seen.insert(chain.clone()))
		.collect()
}

/// A single certificate, kept both as the original PEM text and as DER.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Certificate {
	pem: String,
	der: Vec<u8>,
	/// DER encoded SubjectPublicKeyInfo.
	public_key: Vec<u8>,
}

impl Certificate {
	/// Decodes a single PEM certificate and checks that it parses as X.509.
	pub fn from_pem(pem: &str) -> Result<Self, CertificateError> {
		let (_, decoded) = parse_x509_pem(pem.as_bytes())
			.map_err(|err| CertificateError::Pem(err.to_string()))?;
		if decoded.label != "CERTIFICATE" {
			return Err(CertificateError::WrongLabel(decoded.label));
		}
		let der = decoded.contents;
		let public_key = {
			let (_, x509) = X509Certificate::from_der(&der)
				.map_err(|err| CertificateError::Der(err.to_string()))?;
			x509.public_key().raw.to_vec()
		};
		Ok(Self {
			pem: pem.to_owned(),
			der,
			public_key,
		})
	}

	pub fn pem(&self) -> &str {
		&self.pem
	}

	pub fn der(&self) -> &[u8] {
		&self.der
	}

	/// The DER encoded SubjectPublicKeyInfo of this certificate.
	pub fn public_key_der(&self) -> &[u8] {
		&self.public_key
	}

	/// Parses the DER again, borrowing from `self`.
	pub fn x509(&self) -> Result<X509Certificate<'_>, X509Error> {
		X509Certificate::from_der(&self.der)
			.map(|(_, x509)| x509)
			.map_err(|err| match err {
				x509_parser::nom::Err::Error(e) | x509_parser::nom::Err::Failure(e) => e,
				x509_parser::nom::Err::Incomplete(_) => X509Error::InvalidCertificate,
			})
	}

	/// SHA-256 over the DER encoding.
	pub fn fingerprint(&self) -> [u8; 32] {
		Sha256::digest(&self.der).into()
	}
}

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum CertificateError {
	#[error("invalid PEM: {0}")]
	Pem(String),
	#[error("expected a CERTIFICATE PEM block but got {0:?}")]
	WrongLabel(String),
	#[error("invalid X.509 DER: {0}")]
	Der(String),
}

/// An ordered, non-empty list of certificates. Index 0 is the leaf.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CertificateChain {
	blob: String,
	certs: Vec<Certificate>,
}

impl CertificateChain {
	/// Splits and parses a concatenated PEM blob.
	pub fn from_blob(blob: &str) -> Result<Self, ParseError> {
		let certs = split(blob)
			.iter()
			.enumerate()
			.map(|(index, pem)| {
				Certificate::from_pem(pem)
					.map_err(|source| ParseError::Certificate { index, source })
			})
			.collect::<Result<Vec<_>, _>>()?;
		if certs.is_empty() {
			return Err(ParseError::EmptyChain);
		}
		Ok(Self {
			blob: blob.to_owned(),
			certs,
		})
	}

	/// The end-entity certificate.
	pub fn leaf(&self) -> &Certificate {
		// Non-empty by construction.
		&self.certs[0]
	}

	/// The certificate that issued the leaf, if the chain contains it.
	pub fn leaf_issuer(&self) -> Option<&Certificate> {
		self.certs.get(1)
	}

	pub fn certificates(&self) -> &[Certificate] {
		&self.certs
	}

	pub fn len(&self) -> usize {
		self.certs.len()
	}

	/// Always false, chains are never empty. Provided for clippy.
	pub fn is_empty(&self) -> bool {
		self.certs.is_empty()
	}

	/// The blob this chain was parsed from.
	pub fn blob(&self) -> &str {
		&self.blob
	}
}

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum ParseError {
	#[error("certificate chain contained no certificates")]
	EmptyChain,
	#[error("certificate at index {index} is malformed")]
	Certificate {
		index: usize,
		#[source]
		source: CertificateError,
	},
}
