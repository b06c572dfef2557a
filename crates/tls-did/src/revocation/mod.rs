//! Revocation checking of leaf certificates over OCSP.
//!
//! A certificate either advertises an OCSP responder in its Authority
//! Information Access extension, or it does not. Not advertising one is a
//! legitimate terminal state: there is nothing to query, and the check is
//! skipped. When a responder is advertised, only a [`RevocationStatus::Good`]
//! answer passes. Everything else, including a responder that cannot be
//! reached in time, fails closed.

pub mod http;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;
use x509_parser::{
	certificate::X509Certificate, error::X509Error, extensions::GeneralName,
	extensions::ParsedExtension,
};

use crate::chain::Certificate;

pub use self::http::HttpOcspTransport;

/// Access method identifying an OCSP responder in Authority Information Access.
pub const OCSP_ACCESS_METHOD: &str = "1.3.6.1.5.5.7.48.1";

/// The answer of an OCSP responder about one certificate.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum RevocationStatus {
	Good,
	Revoked,
	Unknown,
}

/// Whether `cert` advertises an OCSP responder.
pub fn has_revocation_endpoint(cert: &X509Certificate<'_>) -> bool {
	discover_endpoint(cert).is_some()
}

/// The first OCSP responder URI advertised by `cert`.
pub fn discover_endpoint(cert: &X509Certificate<'_>) -> Option<String> {
	cert.extensions()
		.iter()
		.filter_map(|ext| match ext.parsed_extension() {
			ParsedExtension::AuthorityInfoAccess(aia) => Some(aia),
			_ => None,
		})
		.flat_map(|aia| aia.accessdescs.iter())
		.filter(|access| access.access_method.to_id_string() == OCSP_ACCESS_METHOD)
		.find_map(|access| match &access.access_location {
			GeneralName::URI(uri) if !uri.is_empty() => Some(uri.to_string()),
			_ => None,
		})
}

/// Carries OCSP queries to a responder. This trait exists to support mocking
/// of the network, for the purposes of testing.
#[async_trait]
pub trait RevocationTransport: std::fmt::Debug + Send + Sync + 'static {
	/// Asks the responder at `endpoint` about `cert`, which was issued by `issuer`.
	async fn query_status(
		&self,
		endpoint: &str,
		cert: &Certificate,
		issuer: &Certificate,
	) -> Result<RevocationStatus, TransportError>;
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
	#[error("unsupported OCSP endpoint {0:?}")]
	InvalidEndpoint(String),
	#[error("OCSP request failed")]
	Http(#[from] reqwest::Error),
	#[error("OCSP responder answered with http status {0}")]
	Status(reqwest::StatusCode),
	#[error("OCSP responder answered with status {0}")]
	Unsuccessful(String),
	#[error("failed to encode or decode OCSP message")]
	OpenSsl(#[from] openssl::error::ErrorStack),
	#[error("OCSP response signature is not trusted")]
	Untrusted(#[source] openssl::error::ErrorStack),
	#[error("OCSP response is outside of its validity period")]
	Stale(#[source] openssl::error::ErrorStack),
}

/// Errors which prevent learning the revocation status of a certificate. These
/// are distinct from a certificate being revoked.
#[derive(thiserror::Error, Debug)]
pub enum RevocationError {
	#[error("certificate does not advertise an OCSP responder")]
	NoEndpoint,
	#[error("OCSP query timed out after {0:?}")]
	Timeout(Duration),
	#[error("failed to parse certificate")]
	Parse(#[from] X509Error),
	#[error(transparent)]
	Transport(#[from] TransportError),
}

/// Queries revocation status through a [`RevocationTransport`], bounded by a
/// timeout.
#[derive(Debug, Clone)]
pub struct RevocationChecker {
	transport: Arc<dyn RevocationTransport>,
	timeout: Duration,
}

impl RevocationChecker {
	pub fn new(transport: Arc<dyn RevocationTransport>, timeout: Duration) -> Self {
		Self { transport, timeout }
	}

	/// Asks the responder advertised by `cert` for its status.
	pub async fn check_status(
		&self,
		cert: &Certificate,
		issuer: &Certificate,
	) -> Result<RevocationStatus, RevocationError> {
		let endpoint =
			discover_endpoint(&cert.x509()?).ok_or(RevocationError::NoEndpoint)?;
		let status = tokio::time::timeout(
			self.timeout,
			self.transport.query_status(&endpoint, cert, issuer),
		)
		.await
		.map_err(|_elapsed| RevocationError::Timeout(self.timeout))??;
		debug!(%endpoint, ?status, "queried OCSP responder");
		Ok(status)
	}
}
