//! Validation of a single certificate chain for a domain.

use std::time::{SystemTime, UNIX_EPOCH};

use futures::{StreamExt as _, TryStreamExt as _};
use tracing::debug;
use x509_parser::{certificate::X509Certificate, error::X509Error};

use crate::{
	anchors::TrustAnchorStore,
	chain::{Certificate, CertificateChain},
	revocation::{self, RevocationChecker, RevocationError, RevocationStatus},
};

/// A chain together with whether it is valid for the domain it was checked
/// against.
#[derive(Debug)]
pub struct VerificationOutcome {
	pub chain: CertificateChain,
	pub validity: Validity,
}

impl VerificationOutcome {
	pub fn is_valid(&self) -> bool {
		matches!(self.validity, Validity::Valid)
	}
}

#[derive(Debug)]
pub enum Validity {
	Valid,
	Invalid(InvalidReason),
}

/// Why a well formed chain is not valid.
#[derive(thiserror::Error, Debug)]
pub enum InvalidReason {
	#[error("no valid path to a trust anchor")]
	Path(#[from] PathError),
	#[error("leaf subject {found:?} does not match domain {expected:?}")]
	SubjectMismatch {
		expected: String,
		found: Option<String>,
	},
	#[error("leaf certificate is revoked")]
	Revoked,
	#[error("OCSP responder does not know the leaf certificate")]
	RevocationUnknown,
	#[error("revocation check failed")]
	RevocationCheckFailed(#[source] RevocationError),
}

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum PathError {
	#[error("certificate at depth {0} is not yet valid")]
	NotYetValid(usize),
	#[error("certificate at depth {0} has expired")]
	Expired(usize),
	#[error("certificate at depth {0} is not a CA but is used as issuer")]
	NotCa(usize),
	#[error("certificate at depth {0} exceeds the path length of its issuer")]
	PathLenExceeded(usize),
	#[error("certificate at depth {0} may not sign certificates")]
	MissingKeyCertSign(usize),
	#[error("issuer of certificate at depth {0} is not the subject of the next certificate")]
	IssuerMismatch(usize),
	#[error("signature of certificate at depth {depth} does not verify: {reason}")]
	BadSignature { depth: usize, reason: String },
	#[error("chain ends in a self signed certificate that is not a trust anchor")]
	UntrustedRoot,
	#[error("no trust anchor issued any certificate of the chain")]
	NoTrustedIssuer,
	#[error("trust anchor is not valid at the validation time")]
	AnchorNotValid,
}

/// Failures of validation itself, as opposed to the chain being invalid.
#[derive(thiserror::Error, Debug)]
pub enum ValidationError {
	#[error("failed to re-parse certificate at depth {depth}")]
	Reparse {
		depth: usize,
		#[source]
		source: X509Error,
	},
}

/// Validates chains for a domain. Holds no mutable state, so one validator can
/// check many chains concurrently.
#[derive(Debug, Clone)]
pub struct ChainValidator {
	revocation: RevocationChecker,
	at_time: Option<SystemTime>,
}

impl ChainValidator {
	pub fn new(revocation: RevocationChecker) -> Self {
		Self {
			revocation,
			at_time: None,
		}
	}

	/// Validates as of `time` instead of the current time.
	pub fn at_time(mut self, time: SystemTime) -> Self {
		self.at_time = Some(time);
		self
	}

	fn now_ts(&self) -> i64 {
		let now = self.at_time.unwrap_or_else(SystemTime::now);
		match now.duration_since(UNIX_EPOCH) {
			Ok(since) => i64::try_from(since.as_secs()).unwrap_or(i64::MAX),
			Err(before) => {
				-i64::try_from(before.duration().as_secs()).unwrap_or(i64::MAX)
			}
		}
	}

	/// Checks, in order, the path to a trust anchor, the leaf subject and then
	/// the revocation status of the leaf. Revocation is only queried for chains
	/// that pass the other checks.
	pub async fn validate(
		&self,
		chain: CertificateChain,
		domain: &str,
		anchors: &TrustAnchorStore,
	) -> Result<VerificationOutcome, ValidationError> {
		let checked = check_offline(&chain, domain, anchors, self.now_ts())?;
		let validity = match checked {
			Err(reason) => Validity::Invalid(reason),
			Ok(Offline {
				issuer,
				has_endpoint: false,
			}) => {
				debug!(issuer = ?issuer.fingerprint(), "leaf has no OCSP responder, skipping revocation check");
				Validity::Valid
			}
			Ok(Offline {
				issuer,
				has_endpoint: true,
			}) => match self.revocation.check_status(chain.leaf(), &issuer).await {
				Ok(RevocationStatus::Good) => Validity::Valid,
				Ok(RevocationStatus::Revoked) => {
					Validity::Invalid(InvalidReason::Revoked)
				}
				Ok(RevocationStatus::Unknown) => {
					Validity::Invalid(InvalidReason::RevocationUnknown)
				}
				Err(err) => {
					Validity::Invalid(InvalidReason::RevocationCheckFailed(err))
				}
			},
		};
		debug!(
			leaf = %hex::encode(chain.leaf().fingerprint()),
			?validity,
			"validated chain"
		);
		Ok(VerificationOutcome { chain, validity })
	}

	/// Validates every chain, with at most `concurrency` validations in flight.
	/// Outcomes are in the same order as `chains`.
	pub async fn validate_all(
		&self,
		chains: Vec<CertificateChain>,
		domain: &str,
		anchors: &TrustAnchorStore,
		concurrency: usize,
	) -> Result<Vec<VerificationOutcome>, ValidationError> {
		futures::stream::iter(chains)
			.map(|chain| self.validate(chain, domain, anchors))
			.buffered(concurrency.max(1))
			.try_collect()
			.await
	}
}

/// Result of the checks that need no network access.
struct Offline {
	/// Issuer of the leaf.
	issuer: Certificate,
	has_endpoint: bool,
}

fn check_offline(
	chain: &CertificateChain,
	domain: &str,
	anchors: &TrustAnchorStore,
	now: i64,
) -> Result<Result<Offline, InvalidReason>, ValidationError> {
	let parsed = chain
		.certificates()
		.iter()
		.enumerate()
		.map(|(depth, cert)| {
			cert.x509()
				.map_err(|source| ValidationError::Reparse { depth, source })
		})
		.collect::<Result<Vec<_>, _>>()?;

	let issuer = match check_path(chain, &parsed, anchors, now) {
		Ok(issuer) => issuer,
		Err(err) => return Ok(Err(err.into())),
	};

	let leaf = &parsed[0];
	let found = leaf_common_name(leaf);
	if found.as_deref() != Some(domain) {
		return Ok(Err(InvalidReason::SubjectMismatch {
			expected: domain.to_owned(),
			found,
		}));
	}

	Ok(Ok(Offline {
		issuer,
		has_endpoint: revocation::has_revocation_endpoint(leaf),
	}))
}

/// The first Common Name of the subject. Subject alternative names and any
/// further Common Names are deliberately not considered.
fn leaf_common_name(leaf: &X509Certificate<'_>) -> Option<String> {
	leaf.subject()
		.iter_common_name()
		.next()
		.and_then(|cn| cn.as_str().ok())
		.map(str::to_owned)
}

/// Verifies the cryptographic path from the leaf to a trust anchor. Returns the
/// issuer of the leaf.
///
/// The path ends at the first certificate, walking up from the leaf, that is a
/// trust anchor or was issued by one. Certificates above it are not part of the
/// path, so a trailing cross-signed or expired copy of a root does not matter.
fn check_path(
	chain: &CertificateChain,
	parsed: &[X509Certificate<'_>],
	anchors: &TrustAnchorStore,
	now: i64,
) -> Result<Certificate, PathError> {
	let anchored = parsed.iter().enumerate().find_map(|(depth, x509)| {
		anchors
			.find_equivalent(x509)
			.or_else(|| anchors.find_issuer(x509))
			.map(|anchor| (depth, anchor))
	});
	let path = match anchored {
		Some((top, _)) => &parsed[..=top],
		None => parsed,
	};

	for (depth, x509) in path.iter().enumerate() {
		check_time(x509, now, depth)?;
	}

	for (depth, x509) in path.iter().enumerate().skip(1) {
		check_issuing_ca(x509, depth)?;
	}

	for (depth, pair) in path.windows(2).enumerate() {
		if pair[0].issuer().as_raw() != pair[1].subject().as_raw() {
			return Err(PathError::IssuerMismatch(depth));
		}
		pair[0]
			.verify_signature(Some(pair[1].public_key()))
			.map_err(|err| PathError::BadSignature {
				depth,
				reason: err.to_string(),
			})?;
	}

	let Some((top, anchor)) = anchored else {
		// Non-empty by construction.
		let last = &parsed[parsed.len() - 1];
		return Err(
			if last.subject().as_raw() == last.issuer().as_raw()
				&& last.verify_signature(None).is_ok()
			{
				PathError::UntrustedRoot
			} else {
				PathError::NoTrustedIssuer
			},
		);
	};
	let anchor_x509 = anchor.x509().map_err(|_| PathError::AnchorNotValid)?;
	check_time(&anchor_x509, now, top + 1).map_err(|_| PathError::AnchorNotValid)?;

	Ok(match (top, chain.leaf_issuer()) {
		(1.., Some(issuer)) => issuer.clone(),
		_ => anchor.clone(),
	})
}

/// Checks that the certificate at `depth` may issue the one below it.
fn check_issuing_ca(x509: &X509Certificate<'_>, depth: usize) -> Result<(), PathError> {
	let constraints = x509
		.basic_constraints()
		.ok()
		.flatten()
		.map(|bc| bc.value)
		.filter(|bc| bc.ca)
		.ok_or(PathError::NotCa(depth))?;
	// Number of intermediates between this certificate and the leaf.
	let below = depth - 1;
	if let Some(path_len) = constraints.path_len_constraint {
		if below > path_len as usize {
			return Err(PathError::PathLenExceeded(depth));
		}
	}
	// An absent keyUsage extension places no restriction.
	if let Ok(Some(key_usage)) = x509.key_usage() {
		if !key_usage.value.key_cert_sign() {
			return Err(PathError::MissingKeyCertSign(depth));
		}
	}
	Ok(())
}

fn check_time(
	x509: &X509Certificate<'_>,
	now: i64,
	depth: usize,
) -> Result<(), PathError> {
	let validity = x509.validity();
	if now < validity.not_before.timestamp() {
		Err(PathError::NotYetValid(depth))
	} else if now > validity.not_after.timestamp() {
		Err(PathError::Expired(depth))
	} else {
		Ok(())
	}
}
