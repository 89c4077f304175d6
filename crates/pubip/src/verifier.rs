use {
    crate::providers::ProviderDescriptor,
    async_trait::async_trait,
    bytes::Bytes,
    derive_more::{Debug, Display},
    reqwest::{Client, header::CONTENT_TYPE},
    serde_json::{Map, Value, from_slice as unjson},
    std::{
        net::Ipv4Addr,
        time::{Duration, Instant},
    },
    strum_macros::EnumIs,
    tracing::{debug, info, instrument, warn},
};

const JSON_CONTENT_TYPE: &str = "application/json";
const IP_FIELD: &str = "ip";

/// What came back from a single provider call, before any checks.
#[derive(Clone, Debug)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// Why a provider response was not trusted.
#[derive(Clone, PartialEq, Debug, Display, EnumIs)]
pub enum Reason {
    #[display("unexpected status {_0}")]
    Status(u16),
    #[display("unexpected content type {_0:?}")]
    ContentType(Option<String>),
    #[display("malformed JSON: {_0}")]
    Parse(String),
    #[display("payload is not a JSON object")]
    Shape,
    #[display("payload has no string \"ip\" field")]
    MissingKey,
    #[display("not an IPv4 address: {_0}")]
    BadIp(String),
    #[display("transport failure: {_0}")]
    Transport(String),
}

impl Reason {
    /// Short stable tag for logs and diagnostics.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Status(_) => "status",
            Self::ContentType(_) => "content-type",
            Self::Parse(_) => "parse",
            Self::Shape => "shape",
            Self::MissingKey => "missing-key",
            Self::BadIp(_) => "bad-ip",
            Self::Transport(_) => "transport",
        }
    }
}

/// The fields extracted from a response that passed every check.
#[derive(Clone, PartialEq, Debug)]
pub struct Validated {
    pub ip: Ipv4Addr,
    pub country_code: String,
    pub payload_bytes: usize,
}

/// A validated response along with how long the call took.
#[derive(Clone, Debug)]
pub struct Fetched {
    pub validated: Validated,
    pub http_latency_ms: f64,
}

/// Checks the raw response in order, stopping at the first failure.
pub fn validate(raw: &RawResponse, country_field: &str) -> Result<Validated, Reason> {
    if raw.status != 200 {
        return Err(Reason::Status(raw.status));
    }

    match raw.content_type.as_deref() {
        Some(ct) if ct.starts_with(JSON_CONTENT_TYPE) => {}
        other => return Err(Reason::ContentType(other.map(str::to_owned))),
    }

    let payload: Value = unjson(&raw.body).map_err(|err| Reason::Parse(err.to_string()))?;
    let Value::Object(payload) = payload else {
        return Err(Reason::Shape);
    };

    let Some(Value::String(ip)) = payload.get(IP_FIELD) else {
        return Err(Reason::MissingKey);
    };

    let ip: Ipv4Addr = ip.parse().map_err(|_| Reason::BadIp(ip.clone()))?;

    Ok(Validated {
        ip,
        country_code: country_code(&payload, country_field),
        payload_bytes: raw.body.len(),
    })
}

// Uppercased country code. Absent or null yields an empty string,
// other non-string values are taken in their JSON form.
fn country_code(payload: &Map<String, Value>, field: &str) -> String {
    match payload.get(field) {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(code)) => code.to_uppercase(),
        Some(other) => other.to_string().to_uppercase(),
    }
}

/// The outbound HTTP capability used to talk to providers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs a GET request bounded by `timeout`.
    /// Network-level failures are reported as [Reason::Transport].
    async fn get(&self, url: &str, timeout: Duration) -> Result<RawResponse, Reason>;
}

/// [Transport] backed by a shared [reqwest::Client].
#[derive(Clone, Default)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, timeout: Duration) -> Result<RawResponse, Reason> {
        let transport_err = |err: reqwest::Error| Reason::Transport(err.to_string());

        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_err)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let body = response.bytes().await.map_err(transport_err)?;

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Calls the provider once and validates what it returned.
/// Every failure, including transport ones, comes back as a [Reason].
#[instrument(name = "fetch", skip_all, fields(provider = %provider))]
pub async fn fetch<T>(
    transport: &T,
    provider: &ProviderDescriptor,
    timeout: Duration,
) -> Result<Fetched, Reason>
where
    T: Transport + ?Sized,
{
    debug!(url = %provider.url(), "requesting provider");

    let started = Instant::now();
    let result = transport
        .get(provider.url(), timeout)
        .await
        .and_then(|raw| validate(&raw, provider.country_field()));
    let http_latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    match result {
        Ok(validated) => {
            info!(
                http_latency_ms,
                payload_bytes = validated.payload_bytes,
                "provider responded",
            );
            Ok(Fetched {
                validated,
                http_latency_ms,
            })
        }
        Err(reason) => {
            warn!(
                reason = reason.tag(),
                latency_ms = http_latency_ms,
                "provider rejected: {}",
                reason
            );
            Err(reason)
        }
    }
}
