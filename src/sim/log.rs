use log::LevelFilter;

/// Map the numeric `log_level` knob onto a `log` filter.
pub fn to_level_filter(ulevel: u64) -> LevelFilter {
    match ulevel {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the global logger. `RUST_LOG`, when set, overrides `ulevel`.
pub fn init_logger(ulevel: u64) {
    let mut builder = env_logger::Builder::from_default_env();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(to_level_filter(ulevel));
    }
    // a logger may already be installed, e.g. by a test harness
    let _ = builder.format_timestamp(None).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_grow_with_the_knob() {
        assert_eq!(LevelFilter::Warn, to_level_filter(0));
        assert_eq!(LevelFilter::Info, to_level_filter(1));
        assert_eq!(LevelFilter::Debug, to_level_filter(2));
        assert!(to_level_filter(7) > LevelFilter::Debug);
    }
}
