use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

const CRATES: [&str; 3] = ["meshkit", "meshkit_ble_controller", "meshkit_local"];

pub fn init_logging(verbose: bool) {
    // RUST_LOG wins; otherwise our crates at the flag's level, everything else quiet
    let level = if verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directives: Vec<String> = CRATES.iter().map(|c| format!("{c}={level}")).collect();
        EnvFilter::new(format!("warn,{}", directives.join(",")))
    });

    // stdout is for command output
    let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(stderr)
        .with_target(verbose)
        .compact()
        .init();
}
