use std::sync::OnceLock;

// Prefix for every environment variable the application reads
pub const ENV_PREFIX: &str = "PUBIP_";

// Build information from vergen via cargo:rustc-env
pub const BUILD_DATE: &str = env!("VERGEN_BUILD_DATE");

pub const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the string that is shown when CLI is invoked with "--version".
pub fn version() -> &'static str {
    static VERSION: OnceLock<String> = OnceLock::new();
    VERSION.get_or_init(|| format!("v{}, built: {}", CARGO_PKG_VERSION, BUILD_DATE))
}
