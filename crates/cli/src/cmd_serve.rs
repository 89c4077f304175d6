use {
    crate::{app::Executable, args, build_info::{self, ENV_PREFIX}, srv},
    anyhow::{Context, Result},
    clap::Args as ClapArgs,
    const_format::concatcp,
    humantime::Duration as DisplayedDuration,
    std::{
        net::{IpAddr, Ipv4Addr, SocketAddr},
        sync::Arc,
        time::Duration as StdDuration,
    },
    tracing::{info, warn},
};

/// The list of options for the "serve" command.
#[derive(ClapArgs)]
pub struct Args {
    /// The address the HTTP endpoints are served on
    #[arg(
        short,
        long,
        value_name("ADDR"),
        default_value_t = Self::DEF_LISTEN,
        env(concatcp!(ENV_PREFIX, "LISTEN")),
        hide_env=true,
    )]
    listen: SocketAddr,

    #[command(flatten)]
    resolver: args::OfResolver,

    #[command(flatten)]
    providers: args::OfProviders,
}

impl Args {
    const DEF_LISTEN: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 18002);

    // Below this, scrapes that come often hit providers on almost every call.
    const SAFE_MIN_CACHE_TTL: StdDuration = StdDuration::from_secs(10);
}

impl Executable for Args {
    // The preparation for [run], that adjusts some parameters if they had to.
    fn setup(mut self) -> Result<Self> {
        self.providers.setup()?;

        if *self.resolver.cache_ttl < Self::SAFE_MIN_CACHE_TTL {
            warn!(
                given_cache_ttl = %self.resolver.cache_ttl,
                safe_min_cache_ttl = %DisplayedDuration::from(Self::SAFE_MIN_CACHE_TTL),
                concat!(
                    "specified cache TTL could be too short, ",
                    "many providers rate limit frequent requests from the same IP",
                ),
            )
        }

        Ok(self)
    }

    // The "main" function for the "serve" command.
    // Builds the resolver and serves it until interrupted.
    async fn run(self, _: args::Global) -> Result<()> {
        info!(
            version = build_info::version(),
            providers = ?self.providers.enable,
            "welcome to pubip-exporter"
        );

        let resolver = pubip::resolver_by(&self.providers.enable, self.resolver.config())
            .with_context(|| "cannot build the resolver")?;

        srv::serve(self.listen, Arc::new(resolver)).await
    }
}
