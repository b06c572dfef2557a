//! Assembly of DID documents from path-addressed attributes.
//!
//! An attribute path is a `/` separated list of segments. A segment ending in
//! `[]` addresses an array:
//!
//! - As the final segment, `key[]` appends the value to the array at `key`.
//!   Applying the same path twice appends twice.
//! - As an inner segment, `key[]` descends into the *last* element of the
//!   array, which is created holding one empty object if it did not exist yet.
//!
//! A plain final `key` overwrites whatever was at `key`, and a plain inner
//! `key` descends into the object at `key`, creating it if needed.

use std::collections::BTreeMap;

use jose_jwk::Jwk;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::did::DidTls;

pub const DID_CONTEXT: &str = "https://www.w3.org/ns/did/v1";
pub const VERIFICATION_METHOD_TYPE: &str = "JsonWebKey2020";

/// A scalar value to place at a location in the document.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Attribute {
	pub path: String,
	pub value: String,
}

impl Attribute {
	pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			value: value.into(),
		}
	}
}

/// One `/` delimited piece of an attribute path.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Segment {
	pub key: String,
	pub is_array_append: bool,
}

/// Parses `path` into its segments. Never returns an empty list.
pub fn parse_path(path: &str) -> Result<Vec<Segment>, AssembleError> {
	path.split('/')
		.map(|segment| {
			let (key, is_array_append) = match segment.strip_suffix("[]") {
				Some(key) => (key, true),
				None => (segment, false),
			};
			if key.is_empty() {
				return Err(AssembleError::EmptySegment {
					path: path.to_owned(),
				});
			}
			Ok(Segment {
				key: key.to_owned(),
				is_array_append,
			})
		})
		.collect()
}

/// Document tree that attributes are applied to.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
	Object(BTreeMap<String, Node>),
	Array(Vec<Node>),
	/// Any json value that is neither an object nor an array.
	Scalar(Value),
}

impl From<Value> for Node {
	fn from(value: Value) -> Self {
		match value {
			Value::Object(map) => {
				Node::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
			}
			Value::Array(items) => Node::Array(items.into_iter().map(Node::from).collect()),
			scalar => Node::Scalar(scalar),
		}
	}
}

impl From<Node> for Value {
	fn from(node: Node) -> Self {
		match node {
			Node::Object(map) => {
				Value::Object(map.into_iter().map(|(k, v)| (k, v.into())).collect())
			}
			Node::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
			Node::Scalar(scalar) => scalar,
		}
	}
}

/// Places `value` at `segments` below `object`. On a type conflict, returns
/// the key of the segment that could not be applied.
fn insert<'a>(
	object: &mut BTreeMap<String, Node>,
	segments: &'a [Segment],
	value: &str,
) -> Result<(), &'a str> {
	let Some((segment, rest)) = segments.split_first() else {
		return Ok(());
	};
	let key = segment.key.as_str();
	if rest.is_empty() {
		let leaf = Node::Scalar(Value::String(value.to_owned()));
		if segment.is_array_append {
			match object
				.entry(segment.key.clone())
				.or_insert_with(|| Node::Array(Vec::new()))
			{
				Node::Array(items) => items.push(leaf),
				_ => return Err(key),
			}
		} else {
			object.insert(segment.key.clone(), leaf);
		}
		return Ok(());
	}

	let next = if segment.is_array_append {
		match object
			.entry(segment.key.clone())
			.or_insert_with(|| Node::Array(Vec::new()))
		{
			Node::Array(items) => {
				if items.is_empty() {
					items.push(Node::Object(BTreeMap::new()));
				}
				items.last_mut()
			}
			_ => return Err(key),
		}
	} else {
		Some(
			object
				.entry(segment.key.clone())
				.or_insert_with(|| Node::Object(BTreeMap::new())),
		)
	};
	match next {
		Some(Node::Object(inner)) => insert(inner, rest, value),
		_ => Err(key),
	}
}

/// Applies `attributes` to `base` in order.
pub fn assemble(base: Value, attributes: &[Attribute]) -> Result<Value, AssembleError> {
	let Node::Object(mut root) = Node::from(base) else {
		return Err(AssembleError::BaseNotObject);
	};
	for attribute in attributes {
		let segments = parse_path(&attribute.path)?;
		insert(&mut root, &segments, &attribute.value).map_err(|key| {
			AssembleError::Conflict {
				path: attribute.path.clone(),
				key: key.to_owned(),
			}
		})?;
	}
	Ok(Node::Object(root).into())
}

/// The document skeleton before any attributes are merged in.
pub fn base_document(did: &DidTls, jwk: &Jwk) -> Result<Value, serde_json::Error> {
	Ok(json!({
		"@context": DID_CONTEXT,
		"id": did.as_str(),
		"verificationMethod": [{
			"id": did.key_id(),
			"type": VERIFICATION_METHOD_TYPE,
			"controller": did.as_str(),
			"publicKeyJwk": serde_json::to_value(jwk)?,
		}],
	}))
}

#[derive(thiserror::Error, Debug, Eq, PartialEq)]
pub enum AssembleError {
	#[error("attribute path {path:?} contains an empty segment")]
	EmptySegment { path: String },
	#[error("attribute path {path:?} conflicts with the existing value at {key:?}")]
	Conflict { path: String, key: String },
	#[error("the base document must be a json object")]
	BaseNotObject,
}
