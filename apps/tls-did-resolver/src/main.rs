use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser as _;
use color_eyre::eyre::Context as _;
use tls_did::{
	chain,
	registry::MemoryRegistry,
	revocation::HttpOcspTransport,
	Resolver, ResolverConfig,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Resolves a did:tls identifier and prints its DID document.
#[derive(clap::Parser, Debug)]
struct Cli {
	/// The identifier to resolve, for example `did:tls:example.com`.
	did: String,
	/// JSON snapshot of the registry.
	#[clap(long, env = "TLS_DID_REGISTRY")]
	registry: PathBuf,
	/// PEM bundle of trusted root certificates.
	#[clap(long, env = "TLS_DID_ROOTS")]
	roots: PathBuf,
	/// Maximum number of chains validated at once.
	#[clap(long, env, default_value = "8")]
	concurrency: usize,
	/// Budget for each OCSP query.
	#[clap(long, env, default_value = "10")]
	revocation_timeout_secs: u64,
	/// Also print the resolution metadata.
	#[clap(long)]
	metadata: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;
	tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or("info".into()))
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();

	let cli = Cli::parse();

	let snapshot = tokio::fs::read_to_string(&cli.registry)
		.await
		.wrap_err_with(|| format!("failed to read registry {}", cli.registry.display()))?;
	let registry = MemoryRegistry::from_json(&snapshot)
		.wrap_err("failed to deserialize registry snapshot")?;

	let bundle = tokio::fs::read_to_string(&cli.roots)
		.await
		.wrap_err_with(|| format!("failed to read roots {}", cli.roots.display()))?;
	// Text before the first certificate is not a root.
	let roots: Vec<String> = chain::split(&bundle)
		.into_iter()
		.filter(|pem| pem.starts_with(chain::BEGIN_MARKER))
		.collect();
	info!(roots = roots.len(), "loaded root bundle");

	let revocation_timeout = Duration::from_secs(cli.revocation_timeout_secs);
	let transport = HttpOcspTransport::with_timeout(revocation_timeout)
		.wrap_err("failed to build http client")?;
	let config = ResolverConfig {
		concurrency: cli.concurrency,
		revocation_timeout,
		..Default::default()
	};
	let resolver = Resolver::new(Arc::new(registry), roots, Arc::new(transport), config);

	let resolution = resolver
		.resolve(&cli.did)
		.await
		.wrap_err_with(|| format!("failed to resolve {}", cli.did))?;
	if !resolution.metadata.skipped_anchors.is_empty() {
		warn!(skipped = ?resolution.metadata.skipped_anchors, "some roots were not usable");
	}

	let output = if cli.metadata {
		serde_json::to_string_pretty(&resolution)?
	} else {
		serde_json::to_string_pretty(&resolution.document)?
	};
	println!("{output}");
	Ok(())
}
