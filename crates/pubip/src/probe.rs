use {
    async_trait::async_trait,
    regex::Regex,
    std::{net::Ipv4Addr, process::Stdio, sync::LazyLock, time::Duration},
    tokio::{process::Command, time::timeout as within},
    tracing::{debug, info, instrument, warn},
};

/// Measures round-trip time to an address.
///
/// A failed measurement is not an error: it is reported as [None]
/// and the caller decides how to degrade.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    async fn measure(&self, ip: Ipv4Addr, timeout: Duration) -> Option<f64>;
}

/// [LatencyProbe] that sends a single ICMP echo using the system `ping`.
#[derive(Clone, Debug)]
pub struct PingProbe {
    program: String,
    leading_args: Vec<String>,
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::with_command("ping", Vec::<String>::new())
    }
}

impl PingProbe {
    /// Uses `program` instead of `ping`, passing `leading_args` before
    /// the regular ping arguments.
    pub fn with_command<S, I>(program: S, leading_args: I) -> Self
    where
        S: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            program: program.into(),
            leading_args: leading_args.into_iter().map(Into::into).collect(),
        }
    }

    // The echo deadline handed to ping itself. It is kept one second below
    // the overall timeout so that ping can exit on its own.
    fn deadline_secs(timeout: Duration) -> u64 {
        timeout
            .saturating_sub(Duration::from_secs(1))
            .as_secs()
            .max(1)
    }
}

#[async_trait]
impl LatencyProbe for PingProbe {
    #[instrument(name = "probe", skip(self, timeout))]
    async fn measure(&self, ip: Ipv4Addr, timeout: Duration) -> Option<f64> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.leading_args)
            .args(["-4", "-c", "1", "-w"])
            .arg(Self::deadline_secs(timeout).to_string())
            .arg(ip.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match within(timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(%err, "ping failed to start");
                return None;
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "ping timed out");
                return None;
            }
        };

        if !output.status.success() {
            warn!(status = %output.status, "ping exited unsuccessfully");
            return None;
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        match parse_latency(&stdout) {
            Some(latency_ms) => {
                info!(latency_ms, "ping successful");
                Some(latency_ms)
            }
            None => {
                debug!(%stdout, "unrecognized ping output");
                warn!("ping output missing latency");
                None
            }
        }
    }
}

/// Extracts the round-trip time in milliseconds from ping output.
/// Accepts both `time=12.3 ms` and `time<1 ms` forms.
pub fn parse_latency(output: &str) -> Option<f64> {
    static LATENCY: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"time[=<]?\s*([\d.]+)\s*ms").expect("BUG: invalid latency pattern")
    });

    LATENCY
        .captures(output)
        .and_then(|caps| caps.get(1))
        .and_then(|latency| latency.as_str().parse().ok())
}
