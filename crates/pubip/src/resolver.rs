use {
    crate::{
        cache::CacheStore,
        probe::{LatencyProbe, PingProbe},
        providers::ProviderDescriptor,
        registry::Registry,
        verifier::{self, Fetched, HttpTransport, Transport},
    },
    derive_more::{Debug, Display},
    getset::{CopyGetters, Getters},
    serde::Serialize,
    std::{
        net::Ipv4Addr,
        time::{Duration, Instant},
    },
    tracing::{error, info, instrument},
};

/// Identity data taken from the first provider whose response passed validation.
#[derive(Clone, PartialEq, Debug, Display, Getters, CopyGetters)]
#[display("{}/{}", provider, ip)]
pub struct ResolvedMetadata {
    #[getset(get = "pub")]
    provider: String,

    #[getset(get_copy = "pub")]
    ip: Ipv4Addr,

    #[getset(get = "pub")]
    country_code: String,

    #[getset(get_copy = "pub")]
    http_latency_ms: f64,

    #[getset(get_copy = "pub")]
    payload_bytes: usize,

    /// 1-based position of the provider in the attempt order.
    #[getset(get_copy = "pub")]
    attempt: usize,
}

impl ResolvedMetadata {
    pub fn new<P, C>(
        provider: P,
        ip: Ipv4Addr,
        country_code: C,
        http_latency_ms: f64,
        payload_bytes: usize,
        attempt: usize,
    ) -> Self
    where
        P: Into<String>,
        C: Into<String>,
    {
        assert!(attempt >= 1);
        Self {
            provider: provider.into(),
            ip,
            country_code: country_code.into(),
            http_latency_ms,
            payload_bytes,
            attempt,
        }
    }

    fn from_fetched(provider: &ProviderDescriptor, fetched: Fetched, attempt: usize) -> Self {
        Self::new(
            provider.name().as_str(),
            fetched.validated.ip,
            fetched.validated.country_code,
            fetched.http_latency_ms,
            fetched.validated.payload_bytes,
            attempt,
        )
    }
}

/// The outcome of a successful resolution.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct Resolution {
    pub provider: String,
    pub ip: Ipv4Addr,
    pub country_code: String,
    /// Round-trip time to `ip`, `0.0` when it could not be measured.
    pub ping_ms: f64,
    #[serde(skip)]
    pub cache_hit: bool,
}

#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// How long provider metadata may be reused.
    pub cache_ttl: Duration,
    /// Bound for each single provider call.
    pub http_timeout: Duration,
    /// Bound for the latency probe, process teardown included.
    pub probe_timeout: Duration,
}

impl ResolverConfig {
    pub const DEF_CACHE_TTL: Duration = Duration::from_secs(30);
    pub const DEF_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEF_PROBE_TIMEOUT: Duration = Duration::from_secs(3);
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Self::DEF_CACHE_TTL,
            http_timeout: Self::DEF_HTTP_TIMEOUT,
            probe_timeout: Self::DEF_PROBE_TIMEOUT,
        }
    }
}

/// Resolves the public IPv4 address of this host and the latency to it.
///
/// Provider metadata is cached for [ResolverConfig::cache_ttl],
/// latency is measured anew on every call.
pub struct Resolver<T = HttpTransport, P = PingProbe> {
    registry: Registry,
    cache: CacheStore,
    transport: T,
    probe: P,
    config: ResolverConfig,
}

impl<T, P> Resolver<T, P>
where
    T: Transport,
    P: LatencyProbe,
{
    pub fn new(registry: Registry, transport: T, probe: P) -> Self {
        Self {
            registry,
            cache: CacheStore::new(),
            transport,
            probe,
            config: ResolverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub async fn resolve(&self) -> Option<Resolution> {
        self.resolve_at(Instant::now()).await
    }

    /// Resolves as if the current time were `now`.
    ///
    /// Returns [None] only when every provider was tried and none of them
    /// produced a valid response. In that case nothing is cached or probed.
    #[instrument(name = "resolve", skip_all)]
    pub async fn resolve_at(&self, now: Instant) -> Option<Resolution> {
        let (metadata, cache_hit) = match self.cache.get(now, self.config.cache_ttl) {
            Some(entry) => {
                info!(
                    provider = %entry.metadata.provider(),
                    cache_age_ms = entry.age(now).as_secs_f64() * 1000.0,
                    "using cached ip metadata",
                );
                (entry.metadata, true)
            }
            None => {
                info!("refreshing public ip metadata");
                let Some(metadata) = self.lookup().await else {
                    error!("public ip metadata unavailable");
                    return None;
                };
                self.cache.put(metadata.clone(), now);
                (metadata, false)
            }
        };

        let ping_ms = self
            .probe
            .measure(metadata.ip(), self.config.probe_timeout)
            .await;

        info!(
            provider = %metadata.provider(),
            ip = %metadata.ip(),
            ping_ms = ?ping_ms,
            cache_hit,
            http_latency_ms = metadata.http_latency_ms(),
            attempt = metadata.attempt(),
            "resolved public ip",
        );

        Some(Resolution {
            provider: metadata.provider,
            ip: metadata.ip,
            country_code: metadata.country_code,
            ping_ms: ping_ms.unwrap_or(0.0),
            cache_hit,
        })
    }

    async fn lookup(&self) -> Option<ResolvedMetadata> {
        let attempts = self.registry.ordered_attempts();
        let found = self.try_providers(&attempts).await;

        if found.is_none() {
            error!(
                providers = attempts.len(),
                "all providers failed to supply public ip data"
            );
        }

        found
    }

    // Tries providers one by one in the given order.
    // The first validated response wins, the rest are never contacted.
    async fn try_providers(&self, attempts: &[ProviderDescriptor]) -> Option<ResolvedMetadata> {
        for (attempt, provider) in (1..).zip(attempts) {
            info!(provider = %provider, attempt, "querying provider");

            let Ok(fetched) =
                verifier::fetch(&self.transport, provider, self.config.http_timeout).await
            else {
                continue;
            };

            let metadata = ResolvedMetadata::from_fetched(provider, fetched, attempt);
            info!(
                provider = %provider,
                ip = %metadata.ip(),
                country = %metadata.country_code(),
                attempt,
                "provider succeeded",
            );
            return Some(metadata);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::verifier::{RawResponse, Reason},
        async_trait::async_trait,
        bytes::Bytes,
        parking_lot::Mutex,
        std::{
            collections::{HashMap, VecDeque},
            sync::{
                Arc,
                atomic::{AtomicUsize, Ordering},
            },
        },
        wiremock::{Mock, MockServer, ResponseTemplate, matchers::method},
    };

    const TTL: Duration = Duration::from_secs(30);
    const EPS: Duration = Duration::from_millis(1);

    // Replies per URL and remembers every URL it was asked for.
    #[derive(Default)]
    struct ScriptedTransport {
        replies: HashMap<String, Result<RawResponse, Reason>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn ok(mut self, url: &str, body: serde_json::Value) -> Self {
            let raw = RawResponse {
                status: 200,
                content_type: Some("application/json".to_owned()),
                body: Bytes::from(body.to_string()),
            };
            self.replies.insert(url.to_owned(), Ok(raw));
            self
        }

        fn status(mut self, url: &str, status: u16) -> Self {
            let raw = RawResponse {
                status,
                content_type: Some("application/json".to_owned()),
                body: Bytes::from_static(br#"{"ip": "203.0.113.5"}"#),
            };
            self.replies.insert(url.to_owned(), Ok(raw));
            self
        }

        fn down(mut self, url: &str) -> Self {
            let reason = Reason::Transport("connection refused".to_owned());
            self.replies.insert(url.to_owned(), Err(reason));
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn get(&self, url: &str, _: Duration) -> Result<RawResponse, Reason> {
            self.calls.lock().push(url.to_owned());
            self.replies
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(Reason::Transport("unscripted".to_owned())))
        }
    }

    // Hands out scripted outcomes in order, then keeps returning the last one.
    #[derive(Default)]
    struct ScriptedProbe {
        outcomes: Mutex<VecDeque<Option<f64>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProbe {
        fn returning<I: IntoIterator<Item = Option<f64>>>(outcomes: I) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into_iter().collect()),
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LatencyProbe for ScriptedProbe {
        async fn measure(&self, _: Ipv4Addr, _: Duration) -> Option<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock();
            match outcomes.len() {
                0 => None,
                1 => outcomes[0],
                _ => outcomes.pop_front().flatten(),
            }
        }
    }

    fn provider(name: &str) -> ProviderDescriptor {
        ProviderDescriptor::new(name, format!("mock://{name}"), "country_code")
    }

    fn registry(names: &[&str]) -> Registry {
        Registry::new(names.iter().map(|name| provider(name))).unwrap()
    }

    fn identity(ip: &str, cc: &str) -> serde_json::Value {
        serde_json::json!({ "ip": ip, "country_code": cc })
    }

    #[tokio::test]
    async fn exhausts_every_provider_exactly_once() {
        let transport = ScriptedTransport::default()
            .status("mock://a", 500)
            .status("mock://b", 429)
            .ok("mock://c", serde_json::json!(["203.0.113.5"]))
            .ok("mock://d", identity("2001:db8::1", "us"));

        let resolver = Resolver::new(
            registry(&["a", "b", "c", "d"]),
            transport,
            ScriptedProbe::returning([Some(5.0)]),
        );

        assert_eq!(resolver.resolve().await, None);

        let mut calls = resolver.transport.calls();
        calls.sort();
        assert_eq!(calls, ["mock://a", "mock://b", "mock://c", "mock://d"]);
    }

    #[tokio::test]
    async fn first_success_wins() {
        let transport = ScriptedTransport::default()
            .down("mock://a")
            .ok("mock://b", identity("198.51.100.20", "fr"))
            .ok("mock://c", identity("198.51.100.30", "de"));

        let resolver = Resolver::new(registry(&["a"]), transport, ScriptedProbe::default());

        let metadata = resolver
            .try_providers(&[provider("a"), provider("b"), provider("c")])
            .await
            .unwrap();

        assert_eq!(metadata.provider(), "b");
        assert_eq!(metadata.ip(), Ipv4Addr::new(198, 51, 100, 20));
        assert_eq!(metadata.country_code(), "FR");
        assert_eq!(metadata.attempt(), 2);
        assert_eq!(resolver.transport.calls(), ["mock://a", "mock://b"]);
    }

    #[tokio::test]
    async fn random_order_still_stops_at_first_success() {
        for _ in 0..20 {
            let transport = ScriptedTransport::default()
                .down("mock://a")
                .ok("mock://b", identity("198.51.100.20", "fr"))
                .ok("mock://c", identity("198.51.100.30", "de"));

            let resolver =
                Resolver::new(registry(&["a", "b", "c"]), transport, ScriptedProbe::default());
            let resolution = resolver.resolve().await.unwrap();

            let calls = resolver.transport.calls();
            let last = calls.last().unwrap();
            assert_eq!(last, &format!("mock://{}", resolution.provider));
            assert!(calls.len() <= 2);
        }
    }

    #[tokio::test]
    async fn cache_is_reused_until_ttl() {
        let transport = ScriptedTransport::default().ok("mock://a", identity("203.0.113.5", "us"));
        let resolver = Resolver::new(registry(&["a"]), transport, ScriptedProbe::default())
            .with_config(ResolverConfig {
                cache_ttl: TTL,
                ..Default::default()
            });

        let stored_at = Instant::now();

        let first = resolver.resolve_at(stored_at).await.unwrap();
        assert!(!first.cache_hit);
        assert_eq!(resolver.transport.calls().len(), 1);

        let cached = resolver.resolve_at(stored_at + TTL - EPS).await.unwrap();
        assert!(cached.cache_hit);
        assert_eq!(resolver.transport.calls().len(), 1);

        let fresh = resolver.resolve_at(stored_at + TTL + EPS).await.unwrap();
        assert!(!fresh.cache_hit);
        assert_eq!(resolver.transport.calls().len(), 2);
    }

    #[tokio::test]
    async fn probe_runs_on_every_call() {
        let transport = ScriptedTransport::default().ok("mock://a", identity("203.0.113.5", "us"));
        let probe = ScriptedProbe::returning([Some(11.5), Some(27.25)]);
        let resolver = Resolver::new(registry(&["a"]), transport, probe);

        let now = Instant::now();
        let first = resolver.resolve_at(now).await.unwrap();
        let second = resolver.resolve_at(now + EPS).await.unwrap();

        assert_eq!(first.provider, second.provider);
        assert_eq!(first.ip, second.ip);
        assert_eq!(first.country_code, second.country_code);
        assert_eq!(first.country_code, "US");
        assert!(second.cache_hit);

        assert_eq!(resolver.probe.calls(), 2);
        assert_eq!(resolver.transport.calls().len(), 1);
    }

    #[tokio::test]
    async fn total_failure_neither_caches_nor_probes() {
        let transport = ScriptedTransport::default()
            .down("mock://a")
            .down("mock://b")
            .down("mock://c");
        let resolver = Resolver::new(
            registry(&["a", "b", "c"]),
            transport,
            ScriptedProbe::returning([Some(1.0)]),
        );

        let now = Instant::now();
        assert_eq!(resolver.resolve_at(now).await, None);

        assert_eq!(resolver.transport.calls().len(), 3);
        assert_eq!(resolver.probe.calls(), 0);
        assert!(resolver.cache().get(now, Duration::MAX).is_none());
    }

    #[tokio::test]
    async fn failed_probe_reports_zero() {
        let transport = ScriptedTransport::default().ok("mock://a", identity("203.0.113.5", "us"));
        let resolver = Resolver::new(registry(&["a"]), transport, ScriptedProbe::returning([None]));

        let resolution = resolver.resolve().await.unwrap();

        assert_eq!(resolution.ping_ms, 0.0);
        assert_eq!(resolution.ip, Ipv4Addr::new(203, 0, 113, 5));
    }

    #[tokio::test]
    async fn timed_out_ping_reports_zero() {
        let transport = ScriptedTransport::default().ok("mock://a", identity("203.0.113.5", "us"));
        let probe = PingProbe::with_command("sh", ["-c", "sleep 5", "ping"]);
        let resolver = Resolver::new(registry(&["a"]), transport, probe).with_config(
            ResolverConfig {
                probe_timeout: Duration::from_millis(300),
                ..Default::default()
            },
        );

        let resolution = resolver.resolve().await.unwrap();
        assert_eq!(resolution.ping_ms, 0.0);
        assert_eq!(resolution.provider, "a");
    }

    #[tokio::test]
    async fn injected_cache_is_honoured() {
        let now = Instant::now();
        let cache = CacheStore::new();
        cache.put(
            ResolvedMetadata::new("ipsb", Ipv4Addr::new(192, 0, 2, 44), "JP", 80.0, 120, 3),
            now,
        );

        let resolver = Resolver::new(
            registry(&["a"]),
            ScriptedTransport::default(),
            ScriptedProbe::returning([Some(3.5)]),
        )
        .with_cache(cache);

        let resolution = resolver.resolve_at(now + EPS).await.unwrap();

        assert_eq!(resolution.provider, "ipsb");
        assert_eq!(resolution.country_code, "JP");
        assert_eq!(resolution.ping_ms, 3.5);
        assert!(resolver.transport.calls().is_empty());
    }

    #[tokio::test]
    async fn concurrent_callers_share_the_slot() {
        let transport = ScriptedTransport::default().ok("mock://a", identity("203.0.113.5", "us"));
        let resolver = Arc::new(Resolver::new(
            registry(&["a"]),
            transport,
            ScriptedProbe::returning([Some(2.0)]),
        ));

        let now = Instant::now();
        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move { resolver.resolve_at(now).await })
            })
            .collect();

        for task in tasks {
            let resolution = task.await.unwrap().unwrap();
            assert_eq!(resolution.ip, Ipv4Addr::new(203, 0, 113, 5));
            assert_eq!(resolution.ping_ms, 2.0);
        }

        // Concurrent misses may each run the loop, but never more than once per caller.
        let calls = resolver.transport.calls().len();
        assert!((1..=16).contains(&calls));
        assert!(resolver.cache().get(now, TTL).is_some());
    }

    #[tokio::test]
    async fn resolves_through_real_http() {
        let broken = MockServer::start().await;
        let html = MockServer::start().await;
        let good = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(0..=1)
            .mount(&broken)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<h1>hi</h1>", "text/html"))
            .expect(0..=1)
            .mount(&html)
            .await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"ip": "198.51.100.77", "country_iso": "gb"})),
            )
            .expect(1)
            .mount(&good)
            .await;

        let registry = Registry::new([
            ProviderDescriptor::new("broken", broken.uri(), "country_code"),
            ProviderDescriptor::new("html", html.uri(), "country_code"),
            ProviderDescriptor::new("good", good.uri(), "country_iso"),
        ])
        .unwrap();

        let resolver = Resolver::new(
            registry,
            HttpTransport::default(),
            ScriptedProbe::returning([Some(9.0)]),
        );

        let resolution = resolver.resolve().await.unwrap();
        assert_eq!(
            resolution,
            Resolution {
                provider: "good".to_owned(),
                ip: Ipv4Addr::new(198, 51, 100, 77),
                country_code: "GB".to_owned(),
                ping_ms: 9.0,
                cache_hit: false,
            }
        );

        // Served from the cache, the good provider is not asked twice.
        assert!(resolver.resolve().await.unwrap().cache_hit);
    }

    #[test]
    fn resolution_serializes_without_diagnostics() {
        let resolution = Resolution {
            provider: "ipwhois".to_owned(),
            ip: Ipv4Addr::new(203, 0, 113, 5),
            country_code: "US".to_owned(),
            ping_ms: 12.5,
            cache_hit: true,
        };

        assert_eq!(
            serde_json::to_value(&resolution).unwrap(),
            serde_json::json!({
                "provider": "ipwhois",
                "ip": "203.0.113.5",
                "country_code": "US",
                "ping_ms": 12.5,
            })
        );
    }
}
