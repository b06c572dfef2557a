//! OCSP over HTTP, as described in RFC 6960 appendix A.

use std::time::Duration;

use async_trait::async_trait;
use openssl::{
	hash::MessageDigest,
	ocsp::{
		OcspCertId, OcspCertStatus, OcspFlag, OcspRequest, OcspResponse,
		OcspResponseStatus,
	},
	stack::Stack,
	x509::{store::X509StoreBuilder, verify::X509VerifyFlags, X509},
};
use reqwest::{
	header::{ACCEPT, CONTENT_TYPE},
	Url,
};

use super::{RevocationStatus, RevocationTransport, TransportError};
use crate::chain::Certificate;

/// Responses whose `thisUpdate`/`nextUpdate` are off by less than this are
/// still accepted.
const MAX_CLOCK_SKEW_SECS: u32 = 300;

/// Sends OCSP requests with an HTTP POST and verifies the signed response
/// against the issuer of the queried certificate.
#[derive(Debug, Clone)]
pub struct HttpOcspTransport {
	client: reqwest::Client,
}

impl HttpOcspTransport {
	pub fn new(client: reqwest::Client) -> Self {
		Self { client }
	}

	/// Creates a transport whose requests give up after `timeout`.
	pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
		let client = reqwest::Client::builder().timeout(timeout).build()?;
		Ok(Self::new(client))
	}
}

#[async_trait]
impl RevocationTransport for HttpOcspTransport {
	async fn query_status(
		&self,
		endpoint: &str,
		cert: &Certificate,
		issuer: &Certificate,
	) -> Result<RevocationStatus, TransportError> {
		let url = Url::parse(endpoint)
			.ok()
			.filter(|url| matches!(url.scheme(), "http" | "https"))
			.ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_owned()))?;
		let request = encode_request(cert, issuer)?;

		let response = self
			.client
			.post(url)
			.header(CONTENT_TYPE, "application/ocsp-request")
			.header(ACCEPT, "application/ocsp-response")
			.body(request)
			.send()
			.await?;
		if !response.status().is_success() {
			return Err(TransportError::Status(response.status()));
		}
		let body = response.bytes().await?;
		decode_response(&body, cert, issuer)
	}
}

fn cert_id(
	cert: &Certificate,
	issuer: &Certificate,
) -> Result<(OcspCertId, X509), TransportError> {
	let subject = X509::from_der(cert.der())?;
	let issuer = X509::from_der(issuer.der())?;
	let id = OcspCertId::from_cert(MessageDigest::sha1(), &subject, &issuer)?;
	Ok((id, issuer))
}

fn encode_request(
	cert: &Certificate,
	issuer: &Certificate,
) -> Result<Vec<u8>, TransportError> {
	let (id, _) = cert_id(cert, issuer)?;
	let mut request = OcspRequest::new()?;
	request.add_id(id)?;
	Ok(request.to_der()?)
}

/// Classifies a DER encoded OCSP response about `cert`.
///
/// Freshness is judged against the system clock, not the resolution time.
/// The response was just fetched, so only the current time can make it stale.
fn decode_response(
	body: &[u8],
	cert: &Certificate,
	issuer: &Certificate,
) -> Result<RevocationStatus, TransportError> {
	let response = OcspResponse::from_der(body)?;
	if response.status() != OcspResponseStatus::SUCCESSFUL {
		return Err(TransportError::Unsuccessful(format!(
			"{:?}",
			response.status()
		)));
	}
	let basic = response.basic()?;

	let (id, issuer) = cert_id(cert, issuer)?;
	// The responder is either the issuer itself, or a delegated responder whose
	// certificate the issuer signed.
	let mut certs = Stack::new()?;
	certs.push(issuer.clone())?;
	let store = {
		let mut builder = X509StoreBuilder::new()?;
		builder.add_cert(issuer)?;
		builder.set_flags(X509VerifyFlags::PARTIAL_CHAIN)?;
		builder.build()
	};
	basic
		.verify(&certs, &store, OcspFlag::TRUST_OTHER)
		.map_err(TransportError::Untrusted)?;

	let Some(status) = basic.find_status(&id) else {
		return Ok(RevocationStatus::Unknown);
	};
	status
		.check_validity(MAX_CLOCK_SKEW_SECS, None)
		.map_err(TransportError::Stale)?;
	Ok(if status.status == OcspCertStatus::GOOD {
		RevocationStatus::Good
	} else if status.status == OcspCertStatus::REVOKED {
		RevocationStatus::Revoked
	} else {
		RevocationStatus::Unknown
	})
}

#[cfg(test)]
mod test {
	use super::*;

	const LEAF_OCSP: &str = include_str!("../../tests/fixtures/leaf_ocsp.pem");
	const INTERMEDIATE: &str = include_str!("../../tests/fixtures/intermediate.pem");
	const LEAF: &str = include_str!("../../tests/fixtures/leaf.pem");

	// Responses about LEAF_OCSP. All but the wrong signer's are signed by the
	// intermediate.
	const OCSP_GOOD: &[u8] = include_bytes!("../../tests/fixtures/ocsp_good.der");
	const OCSP_REVOKED: &[u8] = include_bytes!("../../tests/fixtures/ocsp_revoked.der");
	const OCSP_UNKNOWN: &[u8] = include_bytes!("../../tests/fixtures/ocsp_unknown.der");
	const OCSP_WRONG_SIGNER: &[u8] =
		include_bytes!("../../tests/fixtures/ocsp_wrong_signer.der");
	/// nextUpdate is long past.
	const OCSP_STALE: &[u8] = include_bytes!("../../tests/fixtures/ocsp_stale.der");

	fn fixtures() -> (Certificate, Certificate) {
		(
			Certificate::from_pem(LEAF_OCSP).unwrap(),
			Certificate::from_pem(INTERMEDIATE).unwrap(),
		)
	}

	#[test]
	fn test_encode_request_is_der() {
		let (leaf, issuer) = fixtures();
		let der = encode_request(&leaf, &issuer).unwrap();
		// OCSPRequest is a DER SEQUENCE.
		assert_eq!(der[0], 0x30);
	}

	#[test]
	fn test_decode_rejects_garbage() {
		let (leaf, issuer) = fixtures();
		assert!(matches!(
			decode_response(b"definitely not der", &leaf, &issuer),
			Err(TransportError::OpenSsl(_))
		));
	}

	#[test]
	fn test_decode_classifies_status() {
		let (leaf, issuer) = fixtures();
		for (body, expected) in [
			(OCSP_GOOD, RevocationStatus::Good),
			(OCSP_REVOKED, RevocationStatus::Revoked),
			(OCSP_UNKNOWN, RevocationStatus::Unknown),
		] {
			assert_eq!(decode_response(body, &leaf, &issuer).unwrap(), expected);
		}
	}

	#[test]
	fn test_decode_answer_about_another_certificate_is_unknown() {
		let (_, issuer) = fixtures();
		let other = Certificate::from_pem(LEAF).unwrap();
		assert_eq!(
			decode_response(OCSP_GOOD, &other, &issuer).unwrap(),
			RevocationStatus::Unknown
		);
	}

	#[test]
	fn test_decode_rejects_unauthorized_signer() {
		let (leaf, issuer) = fixtures();
		assert!(matches!(
			decode_response(OCSP_WRONG_SIGNER, &leaf, &issuer),
			Err(TransportError::Untrusted(_))
		));
	}

	#[test]
	fn test_decode_rejects_stale_response() {
		let (leaf, issuer) = fixtures();
		assert!(matches!(
			decode_response(OCSP_STALE, &leaf, &issuer),
			Err(TransportError::Stale(_))
		));
	}

	#[tokio::test]
	async fn test_rejects_unsupported_scheme() {
		let (leaf, issuer) = fixtures();
		let transport = HttpOcspTransport::new(reqwest::Client::new());
		for endpoint in ["ldap://ocsp.example-ca.test", "not a url"] {
			let result = transport.query_status(endpoint, &leaf, &issuer).await;
			assert!(
				matches!(result, Err(TransportError::InvalidEndpoint(ref e)) if e == endpoint),
				"endpoint was {endpoint}"
			);
		}
	}
}
