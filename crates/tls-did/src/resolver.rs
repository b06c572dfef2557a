//! Resolution of a `did:tls` identifier into a DID document.

use std::{
	collections::HashSet,
	fmt::Display,
	sync::Arc,
	time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::{StreamExt as _, TryStreamExt as _};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::{
	anchors::TrustAnchorStore,
	chain::{self, CertificateChain},
	did::{self, DidTls},
	document::{self, AssembleError},
	jwk::{self, JwkError},
	registry::{Address, Registry, RegistryError},
	revocation::{RevocationChecker, RevocationTransport},
	select::{self, SelectionError},
	signature::{OpensslVerifier, SignatureVerifier},
	validate::{ChainValidator, ValidationError},
};

/// Tunables of a [`Resolver`].
#[derive(Debug, Clone)]
pub struct ResolverConfig {
	/// Maximum number of chain validations, and of record fetches, in flight.
	pub concurrency: usize,
	/// Budget for a single OCSP query.
	pub revocation_timeout: Duration,
	/// Resolve as of this time instead of the current time.
	pub at_time: Option<SystemTime>,
}

impl Default for ResolverConfig {
	fn default() -> Self {
		Self {
			concurrency: 8,
			revocation_timeout: Duration::from_secs(10),
			at_time: None,
		}
	}
}

/// A resolved document together with what it was derived from.
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
	pub document: Value,
	pub metadata: ResolutionMetadata,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct ResolutionMetadata {
	/// Address of the identity record the document was built from.
	pub address: Address,
	/// Lowercase hex SHA-256 of the leaf certificate's DER.
	pub leaf_fingerprint: String,
	/// Indices of root certificates that could not be used as trust anchors.
	pub skipped_anchors: Vec<usize>,
}

/// What the registry had nothing of.
#[derive(Debug, Eq, PartialEq, Copy, Clone)]
pub enum Missing {
	CandidateAddresses,
	Chains,
}

impl Display for Missing {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Missing::CandidateAddresses => "identity records",
			Missing::Chains => "certificate chains",
		})
	}
}

#[derive(thiserror::Error, Debug)]
pub enum ResolveError {
	#[error("invalid did:tls identifier")]
	InvalidDid(#[from] did::ParseError),
	#[error("no {kind} are recorded for {domain}")]
	NotFound { kind: Missing, domain: String },
	#[error("failed to read from the registry")]
	Registry(#[from] RegistryError),
	#[error("a recorded certificate chain is malformed")]
	Parse(#[from] chain::ParseError),
	#[error("chain validation failed")]
	Validation(#[from] ValidationError),
	#[error(transparent)]
	Selection(#[from] SelectionError),
	#[error("leaf public key cannot be expressed as a JWK")]
	KeyFormat(#[from] JwkError),
	#[error("failed to assemble the DID document")]
	Assemble(#[from] AssembleError),
	#[error("failed to serialize the DID document")]
	Serialize(#[from] serde_json::Error),
}

/// Resolves `did:tls` identifiers against a [`Registry`].
#[derive(Debug, Clone)]
pub struct Resolver {
	registry: Arc<dyn Registry>,
	/// PEM encoded root certificates, one per element.
	roots: Vec<String>,
	revocation: Arc<dyn RevocationTransport>,
	verifier: Arc<dyn SignatureVerifier>,
	config: ResolverConfig,
}

impl Resolver {
	pub fn new(
		registry: Arc<dyn Registry>,
		roots: Vec<String>,
		revocation: Arc<dyn RevocationTransport>,
		config: ResolverConfig,
	) -> Self {
		Self {
			registry,
			roots,
			revocation,
			verifier: Arc::new(OpensslVerifier),
			config,
		}
	}

	/// Replaces the default [`OpensslVerifier`].
	pub fn with_signature_verifier(mut self, verifier: Arc<dyn SignatureVerifier>) -> Self {
		self.verifier = verifier;
		self
	}

	/// Resolves `did` to its document, or fails as a whole.
	#[instrument(skip(self))]
	pub async fn resolve(&self, did: &str) -> Result<Resolution, ResolveError> {
		let did: DidTls = did.parse()?;
		let domain = did.domain();
		let now = self.config.at_time.unwrap_or_else(SystemTime::now);

		let addresses = dedupe_addresses(self.registry.candidate_addresses(domain).await?);
		if addresses.is_empty() {
			return Err(ResolveError::NotFound {
				kind: Missing::CandidateAddresses,
				domain: domain.to_owned(),
			});
		}
		let blobs = chain::dedupe(self.registry.chains(domain).await?);
		if blobs.is_empty() {
			return Err(ResolveError::NotFound {
				kind: Missing::Chains,
				domain: domain.to_owned(),
			});
		}
		let chains = blobs
			.iter()
			.map(|blob| CertificateChain::from_blob(blob))
			.collect::<Result<Vec<_>, _>>()?;
		debug!(chains = chains.len(), candidates = addresses.len(), "loaded registry entries");

		let (anchors, skipped_anchors) = TrustAnchorStore::build(&self.roots);
		let validator = ChainValidator::new(RevocationChecker::new(
			self.revocation.clone(),
			self.config.revocation_timeout,
		))
		.at_time(now);
		let outcomes = validator
			.validate_all(chains, domain, &anchors, self.config.concurrency)
			.await?;
		let chain = select::unique_valid_chain(outcomes, domain)?;

		let registry = &self.registry;
		let records = futures::stream::iter(addresses)
			.map(|address| async move { registry.identity_record(&address).await })
			.buffered(self.config.concurrency.max(1))
			.try_collect::<Vec<_>>()
			.await?;
		let record = select::unique_candidate(
			&chain,
			records,
			domain,
			unix_seconds(now),
			self.verifier.as_ref(),
		)?;

		let jwk = jwk::public_jwk(chain.leaf())?;
		let base = document::base_document(&did, &jwk)?;
		let document = document::assemble(base, &record.attributes)?;

		let metadata = ResolutionMetadata {
			address: record.address,
			leaf_fingerprint: hex::encode(chain.leaf().fingerprint()),
			skipped_anchors,
		};
		info!(address = %metadata.address, leaf = %metadata.leaf_fingerprint, "resolved");
		Ok(Resolution { document, metadata })
	}

	/// Like [`Self::resolve`], discarding the metadata.
	pub async fn resolve_document(&self, did: &str) -> Result<Value, ResolveError> {
		self.resolve(did).await.map(|resolution| resolution.document)
	}
}

/// Removes repeated addresses, keeping the first occurrence of each.
fn dedupe_addresses(addresses: Vec<Address>) -> Vec<Address> {
	let mut seen = HashSet::new();
	addresses
		.into_iter()
		.filter(|address| seen.insert(address.clone()))
		.collect()
}

/// Times before the epoch clamp to zero.
fn unix_seconds(time: SystemTime) -> u64 {
	time.duration_since(UNIX_EPOCH)
		.map(|since| since.as_secs())
		.unwrap_or(0)
}
