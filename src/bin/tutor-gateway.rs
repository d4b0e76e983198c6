#[cfg(feature = "gateway")]
use std::path::PathBuf;

#[cfg(feature = "gateway")]
use clap::Parser;
#[cfg(feature = "gateway")]
use tutor_gateway::gateway::{GatewayConfig, GatewayHttpState};

/// Streaming chat proxy for the tutor front end.
#[cfg(feature = "gateway")]
#[derive(Parser, Debug)]
#[command(name = "tutor-gateway", version)]
struct CliArgs {
    /// TOML config file; flags and environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, env = "TUTOR_LISTEN")]
    listen: Option<String>,

    #[arg(long, env = "TOGETHER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, env = "HELICONE_API_KEY", hide_env_values = true)]
    observability_key: Option<String>,

    #[arg(long)]
    api_base_url: Option<String>,

    #[arg(long)]
    observability_base_url: Option<String>,

    #[arg(long)]
    app_name: Option<String>,

    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    upstream_timeout_secs: Option<u64>,

    #[arg(long)]
    leading_newline_events: Option<usize>,

    #[arg(long = "redis", env = "RATE_LIMIT_REDIS_URL", hide_env_values = true)]
    redis_url: Option<String>,

    #[arg(long)]
    redis_prefix: Option<String>,

    #[arg(long = "rate-limit-memory", default_value_t = false)]
    rate_limit_memory: bool,

    #[arg(long = "rate-limit-max")]
    rate_limit_max: Option<u32>,

    #[arg(long = "rate-limit-window-secs")]
    rate_limit_window_secs: Option<u64>,

    #[arg(long, default_value_t = false)]
    debug_endpoints: bool,

    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[cfg(feature = "gateway")]
impl CliArgs {
    fn into_config(self) -> Result<GatewayConfig, Box<dyn std::error::Error>> {
        let mut config = match self.config.as_deref() {
            Some(path) => GatewayConfig::load(path)?,
            None => GatewayConfig::default(),
        };

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if self.api_key.is_some() {
            config.api_key = self.api_key;
        }
        if self.observability_key.is_some() {
            config.observability_key = self.observability_key;
        }
        if let Some(url) = self.api_base_url {
            config.api_base_url = url;
        }
        if let Some(url) = self.observability_base_url {
            config.observability_base_url = url;
        }
        if let Some(app_name) = self.app_name {
            config.app_name = app_name;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if self.upstream_timeout_secs.is_some() {
            config.upstream_timeout_secs = self.upstream_timeout_secs;
        }
        if let Some(count) = self.leading_newline_events {
            config.leading_newline_events = count;
        }
        if self.redis_url.is_some() {
            config.rate_limit.redis_url = self.redis_url;
        }
        if self.redis_prefix.is_some() {
            config.rate_limit.redis_prefix = self.redis_prefix;
        }
        if let Some(max) = self.rate_limit_max {
            config.rate_limit.max_requests = max;
        }
        if let Some(window) = self.rate_limit_window_secs {
            config.rate_limit.window_seconds = window;
        }
        config.rate_limit.in_memory |= self.rate_limit_memory;
        config.debug_endpoints |= self.debug_endpoints;
        config.json_logs |= self.json_logs;
        Ok(config)
    }
}

#[cfg(feature = "gateway")]
fn init_tracing(json_logs: bool) -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::Layer as _;
    use tracing_subscriber::layer::SubscriberExt as _;
    use tracing_subscriber::util::SubscriberInitExt as _;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = if json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[cfg(feature = "gateway")]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CliArgs::parse().into_config()?;
    init_tracing(config.json_logs)?;

    if config.api_key.is_none() {
        tracing::warn!("no chat-completion API key configured; chat requests will fail");
    }

    let limiter = config.rate_limiter().await?;
    if let Some(limits) = limiter.limits() {
        tracing::info!(
            max_requests = limits.max_requests,
            window_seconds = limits.window_seconds,
            "caller rate limiting enabled"
        );
    }

    let state = GatewayHttpState::from_config(&config, limiter)?;
    let app = tutor_gateway::gateway::http::router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    tracing::info!(listen = %config.listen, "tutor-gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(not(feature = "gateway"))]
fn main() {
    eprintln!("gateway feature disabled; rebuild with --features gateway");
}
