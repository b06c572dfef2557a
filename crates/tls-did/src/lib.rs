//! Resolution of `did:tls` identifiers.
//!
//! A `did:tls` identifier is anchored to a DNS domain. Rather than trusting a
//! web server to host the DID document, the domain owner records one or more
//! TLS certificate chains and a signed identity record on a ledger. Resolving
//! the DID means deciding which recorded chain (if any) is a valid, unrevoked
//! path from a recognized certificate authority to the domain, and which
//! identity record is the single one signed by that chain's leaf key. The
//! winning record's attributes are then merged into a [DID document][did-core].
//!
//! The pipeline, leaf first:
//!
//! - [`chain`] splits raw PEM blobs into [`chain::CertificateChain`]s.
//! - [`anchors`] builds the [`anchors::TrustAnchorStore`] of root certificates.
//! - [`revocation`] discovers OCSP endpoints and classifies their answers.
//! - [`validate`] checks a chain's path, subject and revocation status.
//! - [`select`] binds the unique valid chain to the unique signed record.
//! - [`document`] assembles the final DID document.
//!
//! [`resolver::Resolver`] drives all of it against a [`registry::Registry`].
//!
//! [did-core]: https://www.w3.org/TR/did-core/

#![forbid(unsafe_code)]

pub mod anchors;
pub mod canonical;
pub mod chain;
pub mod did;
pub mod document;
pub mod jwk;
pub mod registry;
pub mod resolver;
pub mod revocation;
pub mod select;
pub mod signature;
pub mod validate;

pub use crate::did::DidTls;
pub use crate::resolver::{Resolution, ResolveError, Resolver, ResolverConfig};
