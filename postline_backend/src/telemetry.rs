use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVES: &str = "postline_backend=info,tower_http=info";

/// Where log lines go. The REPL keeps stdout for its own output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Server,
    Interactive,
}

/// `POSTLINE_LOG` wins over `RUST_LOG`; neither set means info for this
/// crate and the HTTP layer.
fn filter_directives(postline_log: Option<String>, rust_log: Option<String>) -> String {
    postline_log
        .or(rust_log)
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVES.to_string())
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init_tracing(target: LogTarget) {
    let directives = filter_directives(std::env::var("POSTLINE_LOG").ok(), std::env::var("RUST_LOG").ok());
    let env_filter = EnvFilter::try_new(&directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter);
    let _ = match target {
        LogTarget::Server => builder.with_thread_ids(true).try_init(),
        LogTarget::Interactive => builder.with_writer(std::io::stderr).with_target(false).try_init(),
    };
}
