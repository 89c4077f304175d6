//! Resolution of the host's public IPv4 address through untrusted
//! third-party HTTP providers, with a short-lived cache and a fresh
//! latency measurement on every call.

mod cache;
mod registry;
mod resolver;

pub mod probe;
pub mod providers;
pub mod verifier;

pub use crate::{
    cache::{CacheEntry, CacheStore},
    probe::{LatencyProbe, PingProbe},
    providers::{HttpProvider, HttpProviders, ProviderDescriptor},
    registry::Registry,
    resolver::{ResolvedMetadata, Resolution, Resolver, ResolverConfig},
    verifier::{HttpTransport, Reason, Transport},
};

/// Builds a [Resolver] over the given built-in providers,
/// using the system `ping` and a plain HTTP client.
pub fn resolver_by(
    providers: &[HttpProvider],
    config: ResolverConfig,
) -> anyhow::Result<Resolver> {
    let registry = Registry::new(providers.iter().copied())?;
    let client = reqwest::Client::builder().build()?;

    Ok(
        Resolver::new(registry, HttpTransport::new(client), PingProbe::default())
            .with_config(config),
    )
}
