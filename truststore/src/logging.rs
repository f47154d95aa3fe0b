use tracing_subscriber::EnvFilter;

/// Install a stderr log subscriber for the library's events.
///
/// `RUST_LOG` wins when set. Otherwise `verbose` shows progress messages and
/// the quiet default shows warnings only. Does nothing when the host has
/// already installed a subscriber.
pub fn init(verbose: bool) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            if verbose {
                EnvFilter::new("truststore=info,truststore_engine=info")
            } else {
                EnvFilter::new("warn")
            }
        }))
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();

    if installed.is_err() {
        tracing::debug!("a tracing subscriber is already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_does_not_panic() {
        init(true);
        init(false);
    }
}
