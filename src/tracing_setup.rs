use eyre::{Result, WrapErr};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Initialize structured logging with JSON output.
pub fn init_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true),
        )
        .try_init()
        .wrap_err("installing the JSON tracing subscriber failed")?;
    Ok(())
}

/// Initialize console-friendly logging for development.
pub fn init_console_tracing() -> Result<()> {
    Registry::default()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
        .try_init()
        .wrap_err("installing the console tracing subscriber failed")?;
    Ok(())
}

/// Initialize tracing from an explicit filter directive.
pub fn init_tracing_with_filter(directive: &str, json_format: bool) -> Result<()> {
    let env_filter = EnvFilter::try_new(directive)
        .wrap_err_with(|| format!("invalid log filter: {directive}"))?;

    if json_format {
        Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .wrap_err("installing the tracing subscriber failed")?;
    } else {
        Registry::default()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .wrap_err("installing the tracing subscriber failed")?;
    }
    Ok(())
}

/// Create a request-scoped tracing span.
pub fn create_request_span(method: &str, path: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!(
        "request",
        http.method = method,
        http.path = path,
        request.id = request_id,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}

/// Create a span covering one upstream exchange.
pub fn create_forward_span(target: &str, method: &str) -> tracing::Span {
    tracing::info_span!(
        "forward",
        upstream.target = target,
        http.method = method,
        http.status_code = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    )
}
