use tracing_subscriber::EnvFilter;

/// Install the tracing subscriber. Logs go to stderr so table and JSON
/// output on stdout stay clean. `TASKDESK_LOG` takes an `EnvFilter`
/// directive (default `warn`); `TASKDESK_LOG_FORMAT=json` switches to
/// JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("TASKDESK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = std::env::var("TASKDESK_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(err) = result {
        eprintln!("Failed to initialize logging: {}", err);
    }
}
