use console::Term;
use issue_agent::config::LogLevel;
use tracing_subscriber::EnvFilter;

/// Log to stderr at `level` unless `RUST_LOG` says otherwise
pub fn init(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,issue_agent={level},issue_agent_cli={level}",
            level = level
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(Term::stderr().features().colors_supported())
        .with_target(false)
        .init();
}
