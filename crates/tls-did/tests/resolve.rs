use std::{
	sync::{Arc, Mutex},
	time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use base64::Engine as _;
use eyre::Result;
use openssl::{hash::MessageDigest, pkey::PKey, sign::Signer};
use serde_json::json;
use tls_did::{
	canonical::CanonicalHash,
	chain::{self, Certificate},
	document::Attribute,
	registry::{Address, IdentityRecord, MemoryRegistry},
	revocation::{RevocationStatus, RevocationTransport, TransportError},
	resolver::Missing,
	select::{CandidateRejection, SelectionError},
	signature::{SignatureError, SignatureVerifier},
	validate::InvalidReason,
	ResolveError, Resolver, ResolverConfig,
};

const ROOT: &str = include_str!("fixtures/root.pem");
const INTERMEDIATE: &str = include_str!("fixtures/intermediate.pem");
const LEAF: &str = include_str!("fixtures/leaf.pem");
const LEAF_OCSP: &str = include_str!("fixtures/leaf_ocsp.pem");
const LEAF_EXPIRED: &str = include_str!("fixtures/leaf_expired.pem");
const LEAF_KEY: &str = include_str!("fixtures/leaf.key");

const DID: &str = "did:tls:example.com";
const DOMAIN: &str = "example.com";

/// 2030-01-01T00:00:00Z
fn resolution_time() -> SystemTime {
	UNIX_EPOCH + Duration::from_secs(1_893_456_000)
}

/// Answers every query with the same status.
#[derive(Debug)]
struct StaticTransport(RevocationStatus);

#[async_trait]
impl RevocationTransport for StaticTransport {
	async fn query_status(
		&self,
		_endpoint: &str,
		_cert: &Certificate,
		_issuer: &Certificate,
	) -> Result<RevocationStatus, TransportError> {
		Ok(self.0)
	}
}

fn chain_blob(leaf: &str) -> String {
	[leaf, INTERMEDIATE].concat()
}

fn signed_record(address: &str, attributes: Vec<Attribute>, expiry: Option<u64>) -> IdentityRecord {
	let address = Address::from(address);
	let message = CanonicalHash::compute(DOMAIN, &address, &attributes, expiry).signing_message();
	let key = PKey::private_key_from_pem(LEAF_KEY.as_bytes()).unwrap();
	let mut signer = Signer::new(MessageDigest::sha256(), &key).unwrap();
	signer.update(message.as_bytes()).unwrap();
	IdentityRecord {
		address,
		domain: DOMAIN.to_owned(),
		signature: base64::prelude::BASE64_STANDARD.encode(signer.sign_to_vec().unwrap()),
		expiry,
		attributes,
	}
}

fn registry(chains: &[String], records: Vec<IdentityRecord>) -> MemoryRegistry {
	let mut registry = MemoryRegistry::new();
	for chain in chains {
		registry.add_chain(DOMAIN, chain.clone());
	}
	for record in records {
		registry.add_candidate(DOMAIN, record.address.clone());
		registry.add_record(record);
	}
	registry
}

fn resolver(registry: MemoryRegistry, roots: &[&str], status: RevocationStatus) -> Resolver {
	Resolver::new(
		Arc::new(registry),
		roots.iter().map(|root| root.to_string()).collect(),
		Arc::new(StaticTransport(status)),
		ResolverConfig {
			at_time: Some(resolution_time()),
			..Default::default()
		},
	)
}

#[tokio::test]
async fn test_end_to_end_resolution() -> Result<()> {
	let record = signed_record(
		"0x1111111111111111111111111111111111111111",
		vec![
			Attribute::new("alsoKnownAs[]", "https://example.com"),
			Attribute::new("service[]/id", "did:tls:example.com#home"),
			Attribute::new("service[]/serviceEndpoint", "https://example.com/home"),
		],
		Some(4_102_444_800),
	);
	let registry = registry(&[chain_blob(LEAF)], vec![record.clone()]);
	let resolution = resolver(registry, &[ROOT], RevocationStatus::Revoked)
		.resolve(DID)
		.await?;

	let document = &resolution.document;
	assert_eq!(document["@context"], "https://www.w3.org/ns/did/v1");
	assert_eq!(document["id"], DID);
	assert_eq!(document["verificationMethod"][0]["controller"], DID);
	assert_eq!(
		document["verificationMethod"][0]["id"],
		"did:tls:example.com#keys-1"
	);
	assert_eq!(document["verificationMethod"][0]["type"], "JsonWebKey2020");
	assert_eq!(
		document["verificationMethod"][0]["publicKeyJwk"]["kty"],
		"RSA"
	);
	assert_eq!(document["alsoKnownAs"], json!(["https://example.com"]));
	assert_eq!(
		document["service"],
		json!([{
			"id": "did:tls:example.com#home",
			"serviceEndpoint": "https://example.com/home",
		}])
	);

	let leaf = Certificate::from_pem(LEAF)?;
	assert_eq!(resolution.metadata.address, record.address);
	assert_eq!(
		resolution.metadata.leaf_fingerprint,
		hex::encode(leaf.fingerprint())
	);
	assert!(resolution.metadata.skipped_anchors.is_empty());
	Ok(())
}

#[tokio::test]
async fn test_unusable_roots_are_reported_not_fatal() -> Result<()> {
	let record = signed_record("0xabc", vec![], None);
	let registry = registry(&[chain_blob(LEAF)], vec![record]);
	let resolution = resolver(registry, &["garbage", ROOT, ""], RevocationStatus::Good)
		.resolve(DID)
		.await?;
	assert_eq!(resolution.metadata.skipped_anchors, vec![0, 2]);
	Ok(())
}

#[tokio::test]
async fn test_duplicate_chains_are_not_ambiguous() -> Result<()> {
	let record = signed_record("0xabc", vec![], None);
	let registry = registry(&[chain_blob(LEAF), chain_blob(LEAF)], vec![record.clone(), record]);
	let document = resolver(registry, &[ROOT], RevocationStatus::Good)
		.resolve_document(DID)
		.await?;
	assert_eq!(document["id"], DID);
	Ok(())
}

#[tokio::test]
async fn test_two_valid_chains_are_ambiguous() -> Result<()> {
	let record = signed_record("0xabc", vec![], None);
	let registry = registry(&[chain_blob(LEAF), chain_blob(LEAF_OCSP)], vec![record]);
	let result = resolver(registry, &[ROOT], RevocationStatus::Good)
		.resolve(DID)
		.await;
	assert!(
		matches!(
			result,
			Err(ResolveError::Selection(SelectionError::AmbiguousChain { count: 2, .. }))
		),
		"{result:?}"
	);
	Ok(())
}

#[tokio::test]
async fn test_revoked_chain_leaves_no_valid_chain() -> Result<()> {
	let record = signed_record("0xabc", vec![], None);
	let registry = registry(
		&[chain_blob(LEAF_OCSP), chain_blob(LEAF_EXPIRED)],
		vec![record],
	);
	let result = resolver(registry, &[ROOT], RevocationStatus::Revoked)
		.resolve(DID)
		.await;
	match result {
		Err(ResolveError::Selection(SelectionError::NoValidChain { reasons, .. })) => {
			assert_eq!(reasons.len(), 2);
			assert!(matches!(reasons[0], InvalidReason::Revoked));
			assert!(matches!(reasons[1], InvalidReason::Path(_)));
		}
		other => panic!("expected NoValidChain, got {other:?}"),
	}
	Ok(())
}

#[tokio::test]
async fn test_two_signed_records_are_ambiguous() -> Result<()> {
	let records = vec![
		signed_record("0xa", vec![], None),
		signed_record("0xb", vec![Attribute::new("alsoKnownAs[]", "x")], None),
	];
	let registry = registry(&[chain_blob(LEAF)], records);
	let result = resolver(registry, &[ROOT], RevocationStatus::Good)
		.resolve(DID)
		.await;
	match result {
		Err(ResolveError::Selection(SelectionError::AmbiguousCandidate { addresses, .. })) => {
			assert_eq!(addresses, vec![Address::from("0xa"), Address::from("0xb")]);
		}
		other => panic!("expected AmbiguousCandidate, got {other:?}"),
	}
	Ok(())
}

#[tokio::test]
async fn test_expired_record_is_rejected() -> Result<()> {
	// 2029-01-01, before the resolution time.
	let record = signed_record("0xabc", vec![], Some(1_861_920_000));
	let registry = registry(&[chain_blob(LEAF)], vec![record]);
	let result = resolver(registry, &[ROOT], RevocationStatus::Good)
		.resolve(DID)
		.await;
	match result {
		Err(ResolveError::Selection(SelectionError::NoValidCandidate { rejections, .. })) => {
			assert_eq!(
				rejections,
				vec![(Address::from("0xabc"), CandidateRejection::Expired(1_861_920_000))]
			);
		}
		other => panic!("expected NoValidCandidate, got {other:?}"),
	}
	Ok(())
}

/// Rejects every signature and remembers the keys it was asked about.
#[derive(Debug, Default)]
struct RejectingVerifier {
	keys: Mutex<Vec<Vec<u8>>>,
}

impl SignatureVerifier for RejectingVerifier {
	fn verify(
		&self,
		public_key: &[u8],
		_signature: &[u8],
		_message: &[u8],
	) -> Result<bool, SignatureError> {
		self.keys.lock().unwrap().push(public_key.to_vec());
		Ok(false)
	}
}

#[tokio::test]
async fn test_custom_signature_verifier_is_used() -> Result<()> {
	let record = signed_record("0xabc", vec![], None);
	let registry = registry(&[chain_blob(LEAF)], vec![record]);
	let verifier = Arc::new(RejectingVerifier::default());
	let result = resolver(registry, &[ROOT], RevocationStatus::Good)
		.with_signature_verifier(verifier.clone())
		.resolve(DID)
		.await;
	match result {
		Err(ResolveError::Selection(SelectionError::NoValidCandidate { rejections, .. })) => {
			assert_eq!(
				rejections,
				vec![(Address::from("0xabc"), CandidateRejection::BadSignature)]
			);
		}
		other => panic!("expected NoValidCandidate, got {other:?}"),
	}
	let leaf = Certificate::from_pem(LEAF)?;
	assert_eq!(*verifier.keys.lock().unwrap(), vec![leaf.public_key_der().to_vec()]);
	Ok(())
}

#[tokio::test]
async fn test_missing_registry_entries_are_not_found() -> Result<()> {
	let result = resolver(MemoryRegistry::new(), &[ROOT], RevocationStatus::Good)
		.resolve(DID)
		.await;
	assert!(matches!(
		result,
		Err(ResolveError::NotFound {
			kind: Missing::CandidateAddresses,
			..
		})
	));

	let registry = registry(&[], vec![signed_record("0xabc", vec![], None)]);
	let result = resolver(registry, &[ROOT], RevocationStatus::Good)
		.resolve(DID)
		.await;
	assert!(matches!(
		result,
		Err(ResolveError::NotFound {
			kind: Missing::Chains,
			..
		})
	));
	Ok(())
}

#[tokio::test]
async fn test_malformed_chain_aborts_resolution() -> Result<()> {
	let garbled = format!("{}\nnot base64\n-----END CERTIFICATE-----\n", chain::BEGIN_MARKER);
	let registry = registry(
		&[chain_blob(LEAF), garbled],
		vec![signed_record("0xabc", vec![], None)],
	);
	let result = resolver(registry, &[ROOT], RevocationStatus::Good)
		.resolve(DID)
		.await;
	assert!(matches!(result, Err(ResolveError::Parse(_))), "{result:?}");
	Ok(())
}

#[tokio::test]
async fn test_invalid_did_is_rejected() -> Result<()> {
	let registry = registry(&[chain_blob(LEAF)], vec![signed_record("0xabc", vec![], None)]);
	let resolver = resolver(registry, &[ROOT], RevocationStatus::Good);
	for did in ["did:web:example.com", "did:tls:", "example.com"] {
		let result = resolver.resolve(did).await;
		assert!(matches!(result, Err(ResolveError::InvalidDid(_))), "{did}: {result:?}");
	}
	Ok(())
}
