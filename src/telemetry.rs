//! Tracing subscriber installation for hosts without their own.

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if a global subscriber was already set; the existing one
/// is left in place.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    #[test]
    fn second_init_is_harmless() {
        super::init();
        assert!(!super::init());
    }
}
