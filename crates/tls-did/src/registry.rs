//! Access to the ledger that stores chains and identity records.

use std::{collections::BTreeMap, fmt::Display};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::Attribute;

/// Location of an identity record on the ledger.
#[derive(
	Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl From<String> for Address {
	fn from(value: String) -> Self {
		Self(value)
	}
}

impl From<&str> for Address {
	fn from(value: &str) -> Self {
		Self(value.to_owned())
	}
}

impl Display for Address {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.0)
	}
}

/// A record claiming to describe a domain, pending signature verification.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
	pub address: Address,
	pub domain: String,
	/// Base64 encoded signature over the record's canonical hash.
	pub signature: String,
	/// Unix seconds after which the record is no longer valid.
	#[serde(default)]
	pub expiry: Option<u64>,
	#[serde(default)]
	pub attributes: Vec<Attribute>,
}

/// Read-only view of the ledger.
#[async_trait]
pub trait Registry: std::fmt::Debug + Send + Sync + 'static {
	/// Addresses of every identity record that claims `domain`.
	async fn candidate_addresses(
		&self,
		domain: &str,
	) -> Result<Vec<Address>, RegistryError>;

	/// Every certificate chain recorded for `domain`, as concatenated PEM.
	async fn chains(&self, domain: &str) -> Result<Vec<String>, RegistryError>;

	async fn identity_record(
		&self,
		address: &Address,
	) -> Result<IdentityRecord, RegistryError>;
}

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
	#[error("no identity record at address {0}")]
	UnknownAddress(Address),
	#[error("registry is unavailable")]
	Unavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Registry held in memory. Deserializes from a JSON snapshot of the form
///
/// ```json
/// {
///   "domains": {
///     "example.com": { "addresses": ["0x.."], "chains": ["-----BEGIN ..."] }
///   },
///   "records": [
///     { "address": "0x..", "domain": "example.com", "signature": "..", "attributes": [] }
///   ]
/// }
/// ```
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct MemoryRegistry {
	#[serde(default)]
	domains: BTreeMap<String, DomainEntry>,
	#[serde(default)]
	records: Vec<IdentityRecord>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct DomainEntry {
	#[serde(default)]
	addresses: Vec<Address>,
	#[serde(default)]
	chains: Vec<String>,
}

impl MemoryRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(json)
	}

	/// Lists `address` as a candidate for `domain`.
	pub fn add_candidate(&mut self, domain: &str, address: Address) {
		self.entry(domain).addresses.push(address);
	}

	pub fn add_chain(&mut self, domain: &str, chain: String) {
		self.entry(domain).chains.push(chain);
	}

	/// Stores a record, replacing any record at the same address.
	pub fn add_record(&mut self, record: IdentityRecord) {
		self.records.retain(|r| r.address != record.address);
		self.records.push(record);
	}

	fn entry(&mut self, domain: &str) -> &mut DomainEntry {
		self.domains.entry(domain.to_owned()).or_default()
	}
}

#[async_trait]
impl Registry for MemoryRegistry {
	async fn candidate_addresses(
		&self,
		domain: &str,
	) -> Result<Vec<Address>, RegistryError> {
		Ok(self
			.domains
			.get(domain)
			.map(|e| e.addresses.clone())
			.unwrap_or_default())
	}

	async fn chains(&self, domain: &str) -> Result<Vec<String>, RegistryError> {
		Ok(self
			.domains
			.get(domain)
			.map(|e| e.chains.clone())
			.unwrap_or_default())
	}

	async fn identity_record(
		&self,
		address: &Address,
	) -> Result<IdentityRecord, RegistryError> {
		self.records
			.iter()
			.find(|r| &r.address == address)
			.cloned()
			.ok_or_else(|| RegistryError::UnknownAddress(address.clone()))
	}
}
