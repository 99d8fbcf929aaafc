//! Logger setup for the binaries and for embedding hosts.

#[cfg(target_os = "android")]
pub fn init() {
    use android_logger::Config;
    use log::LevelFilter;

    android_logger::init_once(
        Config::default()
            .with_max_level(LevelFilter::Debug)
            .with_tag("path_tracker"),
    );
}

/// `RUST_LOG` controls the filter, `info` when unset. Calling twice is harmless.
#[cfg(not(target_os = "android"))]
pub fn init() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
