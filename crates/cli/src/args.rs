use {
    crate::build_info::ENV_PREFIX,
    anyhow::{Error, Result, bail},
    clap::{
        Args as ClapArgs,
        builder::{PossibleValuesParser, TypedValueParser},
    },
    const_format::concatcp,
    humantime::{Duration as DisplayedDuration, parse_duration},
    pubip::{HttpProvider, ResolverConfig},
    std::time::Duration as StdDuration,
    strum::{VariantArray, VariantNames},
};

// Creds: https://github.com/clap-rs/clap/discussions/4264
macro_rules! clap_enum_variants {
    ($e: ty) => {{
        use TypedValueParser;
        use VariantNames;
        let parser = PossibleValuesParser::new(<$e as VariantNames>::VARIANTS);
        parser.map(|s| s.parse::<$e>().unwrap())
    }};
}

// The global application options.
#[derive(ClapArgs)]
pub struct Global {
    /// Enable verbose output (up to 3 levels)
    #[arg(global=true, short, long, action=clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Clone, ClapArgs)]
pub struct OfProviders {
    /// The list of providers that should be disabled (assuming enabled all)
    #[arg(
        long,
        value_name("PROVIDER"),
        value_parser = clap_enum_variants!(HttpProvider)
    )]
    pub disable: Vec<HttpProvider>,

    /// The list of enabled providers.
    /// Computed lately based on all providers and given `disable`.
    #[arg(skip)]
    pub enable: Vec<HttpProvider>,
}

impl OfProviders {
    pub fn setup(&mut self) -> Result<()> {
        self.enable = <HttpProvider as VariantArray>::VARIANTS.to_vec();
        self.enable.retain(|e| !self.disable.contains(e));

        if self.enable.is_empty() {
            bail!("at least one provider must stay enabled")
        }
        Ok(())
    }
}

/// Timing options of the resolver, shared by all commands that resolve.
#[derive(Clone, ClapArgs)]
pub struct OfResolver {
    /// How long provider answers are reused before asking again
    #[arg(
        long,
        value_name("DURATION"),
        value_parser = parse_duration_flag,
        default_value_t = DisplayedDuration::from(ResolverConfig::DEF_CACHE_TTL),
        env(concatcp!(ENV_PREFIX, "CACHE_TTL")),
        hide_env=true,
    )]
    pub cache_ttl: DisplayedDuration,

    /// Timeout of each provider request (5s at most)
    #[arg(
        long,
        value_name("DURATION"),
        value_parser = Self::parse_flag_http_timeout,
        default_value_t = DisplayedDuration::from(ResolverConfig::DEF_HTTP_TIMEOUT),
        env(concatcp!(ENV_PREFIX, "HTTP_TIMEOUT")),
        hide_env=true,
    )]
    pub http_timeout: DisplayedDuration,

    /// Timeout of the ping, process teardown included (1s to 3s)
    #[arg(
        long,
        value_name("DURATION"),
        value_parser = Self::parse_flag_probe_timeout,
        default_value_t = DisplayedDuration::from(ResolverConfig::DEF_PROBE_TIMEOUT),
        env(concatcp!(ENV_PREFIX, "PROBE_TIMEOUT")),
        hide_env=true,
    )]
    pub probe_timeout: DisplayedDuration,
}

impl OfResolver {
    const MAX_HTTP_TIMEOUT: StdDuration = StdDuration::from_secs(5);
    const MIN_PROBE_TIMEOUT: StdDuration = StdDuration::from_secs(1);
    const MAX_PROBE_TIMEOUT: StdDuration = StdDuration::from_secs(3);

    // Parser for "--http-timeout" flag.
    fn parse_flag_http_timeout(s: &str) -> Result<DisplayedDuration> {
        parse_bounded(s, StdDuration::from_millis(1), Self::MAX_HTTP_TIMEOUT)
    }

    // Parser for "--probe-timeout" flag.
    fn parse_flag_probe_timeout(s: &str) -> Result<DisplayedDuration> {
        parse_bounded(s, Self::MIN_PROBE_TIMEOUT, Self::MAX_PROBE_TIMEOUT)
    }

    pub fn config(&self) -> ResolverConfig {
        ResolverConfig {
            cache_ttl: *self.cache_ttl,
            http_timeout: *self.http_timeout,
            probe_timeout: *self.probe_timeout,
        }
    }
}

fn parse_duration_flag(s: &str) -> Result<DisplayedDuration> {
    Ok(parse_duration(s).map_err(Error::msg)?.into())
}

fn parse_bounded(s: &str, min: StdDuration, max: StdDuration) -> Result<DisplayedDuration> {
    match parse_duration(s).map_err(Error::msg)? {
        v if v >= min && v <= max => Ok(v.into()),
        v => {
            let min: DisplayedDuration = min.into();
            let max: DisplayedDuration = max.into();
            let have: DisplayedDuration = v.into();
            bail!("must be between {} and {}, get: {}", min, max, have)
        }
    }
}
