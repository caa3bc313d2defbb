use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset: `-v` raises our crates to info, `-vv` to
/// debug, `-vvv` everything to trace.
fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "warn,rpcdiag=info,orchestrator=info,probes=info,rpc_health=info,environment=info,diagnosis=info",
        2 => "warn,rpcdiag=debug,orchestrator=debug,probes=debug,rpc_health=debug,environment=debug,diagnosis=debug",
        _ => "trace",
    }
}

/// Install the global subscriber. Logs go to stderr so stdout stays parseable.
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let res = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init();
    if let Err(e) = res {
        eprintln!("logging already initialized: {}", e);
    }
}
