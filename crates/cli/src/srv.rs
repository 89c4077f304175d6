use {
    anyhow::{Context, Result},
    axum::{
        Json, Router,
        extract::State,
        http::{StatusCode, header::CONTENT_TYPE},
        response::{IntoResponse, Response},
        routing::get,
    },
    pubip::{LatencyProbe, Resolution, Resolver, Transport},
    serde_json::json,
    std::{borrow::Cow, fmt::Write, net::SocketAddr, sync::Arc},
    tokio::{net::TcpListener, signal},
    tower_http::trace::TraceLayer,
    tracing::{error, info},
};

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

type Shared<T, P> = Arc<Resolver<T, P>>;

pub fn router<T, P>(resolver: Shared<T, P>) -> Router
where
    T: Transport + 'static,
    P: LatencyProbe + 'static,
{
    Router::new()
        .route("/ip", get(ip_handler::<T, P>))
        .route("/metrics", get(metrics_handler::<T, P>))
        .layer(TraceLayer::new_for_http())
        .with_state(resolver)
}

/// Serves the endpoints on `listen` until Ctrl+C.
pub async fn serve<T, P>(listen: SocketAddr, resolver: Shared<T, P>) -> Result<()>
where
    T: Transport + 'static,
    P: LatencyProbe + 'static,
{
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("cannot listen on {}", listen))?;

    info!(%listen, "serving /ip and /metrics");

    axum::serve(listener, router(resolver))
        .with_graceful_shutdown(async {
            if let Err(err) = signal::ctrl_c().await {
                error!(%err, "cannot wait for the shutdown signal");
            }
        })
        .await
        .with_context(|| "the HTTP server has failed")
}

async fn ip_handler<T, P>(State(resolver): State<Shared<T, P>>) -> Response
where
    T: Transport + 'static,
    P: LatencyProbe + 'static,
{
    let resolution = resolver.resolve().await;
    info!(success = resolution.is_some(), "/ip request served");

    match resolution {
        Some(resolution) => Json(resolution).into_response(),
        None => (StatusCode::BAD_GATEWAY, Json(json!({}))).into_response(),
    }
}

async fn metrics_handler<T, P>(State(resolver): State<Shared<T, P>>) -> Response
where
    T: Transport + 'static,
    P: LatencyProbe + 'static,
{
    let Some(resolution) = resolver.resolve().await else {
        error!("/metrics request failed to obtain ip data");
        return (StatusCode::BAD_GATEWAY, [(CONTENT_TYPE, "text/plain")], "").into_response();
    };

    info!(
        provider = %resolution.provider,
        ip = %resolution.ip,
        "/metrics request served",
    );

    (
        [(CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)],
        exposition(&resolution),
    )
        .into_response()
}

/// Renders the resolution in the Prometheus text exposition format.
pub fn exposition(resolution: &Resolution) -> String {
    let mut output = String::new();

    output.push_str("# HELP ip_info Public IP info with ping latency\n");
    output.push_str("# TYPE ip_info gauge\n");
    let _ = writeln!(
        output,
        "ip_info{{provider=\"{}\",country_code=\"{}\"}} {:?}",
        escape_label(&resolution.provider),
        escape_label(&resolution.country_code),
        resolution.ping_ms,
    );

    output.push('\n');

    output.push_str("# HELP ip_current_info Current public IP as text in label, stable series\n");
    output.push_str("# TYPE ip_current_info gauge\n");
    let _ = writeln!(
        output,
        "ip_current_info{{label=\"ip_address\",value=\"{}\"}} 1",
        resolution.ip,
    );

    output
}

// Label values may only carry escaped backslashes, quotes and newlines.
fn escape_label(value: &str) -> Cow<'_, str> {
    if !value.contains(['\\', '"', '\n']) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 2);
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    Cow::Owned(escaped)
}
