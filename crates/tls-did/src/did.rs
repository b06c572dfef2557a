//! Parsing of `did:tls` identifiers.

use std::{fmt::Display, str::FromStr};

/// A parsed `did:tls:<domain>` identifier.
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub struct DidTls {
	/// The string representation of the DID.
	s: String,
	/// The substring holding the domain. This is a range index into `s`.
	domain: std::ops::RangeFrom<usize>,
}

impl DidTls {
	pub const PREFIX: &'static str = "did:tls:";

	/// Gets the full DID as a str.
	pub fn as_str(&self) -> &str {
		&self.s
	}

	/// The domain this DID is anchored to.
	pub fn domain(&self) -> &str {
		&self.s[self.domain.clone()]
	}

	/// The id of the verification method built from the leaf certificate key.
	pub fn key_id(&self) -> String {
		format!("{}#keys-1", self.s)
	}

	pub fn into_inner(self) -> String {
		self.s
	}
}

impl FromStr for DidTls {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::try_from(s.to_owned())
	}
}

impl TryFrom<String> for DidTls {
	type Error = ParseError;

	fn try_from(s: String) -> Result<Self, Self::Error> {
		let (method, remaining) = s
			.strip_prefix("did:")
			.ok_or(ParseError::InvalidScheme)?
			.split_once(':')
			.ok_or(ParseError::MissingMethod)?;
		match method {
			"tls" => (),
			"" => return Err(ParseError::MissingMethod),
			other => return Err(ParseError::UnknownMethod(other.to_owned())),
		}
		if remaining.is_empty() {
			return Err(ParseError::MissingDomain);
		}
		if remaining.contains(|c: char| c.is_whitespace() || c == '/' || c == '#') {
			return Err(ParseError::InvalidDomain(remaining.to_owned()));
		}
		let start_idx = s.len() - remaining.len();

		Ok(DidTls {
			s,
			domain: (start_idx..),
		})
	}
}

impl Display for DidTls {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.s)
	}
}

#[derive(Debug, thiserror::Error, Eq, PartialEq)]
pub enum ParseError {
	#[error("expected the did: scheme")]
	InvalidScheme,
	#[error("expected did:method, but method was not present")]
	MissingMethod,
	#[error("expected the \"tls\" method but got {0:?}")]
	UnknownMethod(String),
	#[error("expected a domain after did:tls:")]
	MissingDomain,
	#[error("{0:?} is not a valid domain")]
	InvalidDomain(String),
}
