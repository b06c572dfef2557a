//! Binding of the unique valid chain to the unique identity record it signed.

use base64::Engine as _;
use tracing::debug;

use crate::{
	canonical::CanonicalHash,
	chain::CertificateChain,
	registry::{Address, IdentityRecord},
	signature::SignatureVerifier,
	validate::{InvalidReason, Validity, VerificationOutcome},
};

/// The result of a successful selection.
#[derive(Debug, Clone)]
pub struct IdentityBinding {
	pub chain: CertificateChain,
	pub record: IdentityRecord,
}

#[derive(thiserror::Error, Debug)]
pub enum SelectionError {
	#[error("none of the {} certificate chains for {domain} is valid", reasons.len())]
	NoValidChain {
		domain: String,
		/// Why each chain is invalid, in chain order.
		reasons: Vec<InvalidReason>,
	},
	#[error("{count} certificate chains for {domain} are valid, expected exactly one")]
	AmbiguousChain { domain: String, count: usize },
	#[error("none of the {} identity records for {domain} is signed by the leaf key", rejections.len())]
	NoValidCandidate {
		domain: String,
		rejections: Vec<(Address, CandidateRejection)>,
	},
	#[error("identity records {addresses:?} for {domain} are all signed by the leaf key")]
	AmbiguousCandidate {
		domain: String,
		addresses: Vec<Address>,
	},
}

/// Why a single identity record was not selected.
#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum CandidateRejection {
	#[error("record is for domain {0:?}")]
	DomainMismatch(String),
	#[error("record expired at {0}")]
	Expired(u64),
	#[error("signature does not match the leaf key")]
	BadSignature,
	#[error("signature could not be checked: {0}")]
	SignatureError(String),
}

/// Picks the only valid chain out of `outcomes`.
pub fn unique_valid_chain(
	outcomes: Vec<VerificationOutcome>,
	domain: &str,
) -> Result<CertificateChain, SelectionError> {
	let (mut valid, reasons) = outcomes.into_iter().fold(
		(Vec::new(), Vec::new()),
		|(mut valid, mut reasons), outcome| {
			match outcome.validity {
				Validity::Valid => valid.push(outcome.chain),
				Validity::Invalid(reason) => reasons.push(reason),
			}
			(valid, reasons)
		},
	);
	match valid.len() {
		0 => Err(SelectionError::NoValidChain {
			domain: domain.to_owned(),
			reasons,
		}),
		1 => Ok(valid.remove(0)),
		count => Err(SelectionError::AmbiguousChain {
			domain: domain.to_owned(),
			count,
		}),
	}
}

/// Picks the only record in `candidates` that is signed by the leaf of `chain`
/// and still current at `now` (Unix seconds).
pub fn unique_candidate(
	chain: &CertificateChain,
	candidates: Vec<IdentityRecord>,
	domain: &str,
	now: u64,
	verifier: &dyn SignatureVerifier,
) -> Result<IdentityRecord, SelectionError> {
	let leaf_key = chain.leaf().public_key_der();
	let (mut matches, rejections) = candidates.into_iter().fold(
		(Vec::new(), Vec::new()),
		|(mut matches, mut rejections), record| {
			match check_candidate(&record, leaf_key, domain, now, verifier) {
				Ok(()) => matches.push(record),
				Err(rejection) => {
					debug!(address = %record.address, %rejection, "rejected candidate");
					rejections.push((record.address, rejection));
				}
			}
			(matches, rejections)
		},
	);
	match matches.len() {
		0 => Err(SelectionError::NoValidCandidate {
			domain: domain.to_owned(),
			rejections,
		}),
		1 => Ok(matches.remove(0)),
		_ => Err(SelectionError::AmbiguousCandidate {
			domain: domain.to_owned(),
			addresses: matches.into_iter().map(|r| r.address).collect(),
		}),
	}
}

/// Both stages of selection: the unique valid chain, then the unique record it
/// signed.
pub fn select(
	outcomes: Vec<VerificationOutcome>,
	candidates: Vec<IdentityRecord>,
	domain: &str,
	now: u64,
	verifier: &dyn SignatureVerifier,
) -> Result<IdentityBinding, SelectionError> {
	let chain = unique_valid_chain(outcomes, domain)?;
	let record = unique_candidate(&chain, candidates, domain, now, verifier)?;
	Ok(IdentityBinding { chain, record })
}

fn check_candidate(
	record: &IdentityRecord,
	leaf_key: &[u8],
	domain: &str,
	now: u64,
	verifier: &dyn SignatureVerifier,
) -> Result<(), CandidateRejection> {
	if record.domain != domain {
		return Err(CandidateRejection::DomainMismatch(record.domain.clone()));
	}
	if let Some(expiry) = record.expiry {
		if expiry < now {
			return Err(CandidateRejection::Expired(expiry));
		}
	}
	let signature = base64::prelude::BASE64_STANDARD
		.decode(record.signature.trim())
		.map_err(|err| CandidateRejection::SignatureError(err.to_string()))?;
	let message = CanonicalHash::compute(
		domain,
		&record.address,
		&record.attributes,
		record.expiry,
	)
	.signing_message();
	match verifier.verify(leaf_key, &signature, message.as_bytes()) {
		Ok(true) => Ok(()),
		Ok(false) => Err(CandidateRejection::BadSignature),
		Err(err) => Err(CandidateRejection::SignatureError(err.to_string())),
	}
}
