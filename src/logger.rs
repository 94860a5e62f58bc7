use log::LevelFilter;
use std::str::FromStr;

/// Logs go to stderr so they never interleave with the report tables on stdout.
pub fn init(level: &str) {
    let filter = LevelFilter::from_str(level).unwrap_or_else(|_| {
        eprintln!("Unknown log level '{}', falling back to info", level);
        LevelFilter::Info
    });

    let mut logger = env_logger::Builder::new();
    logger.format_timestamp_millis();
    logger.filter(None, filter);
    logger.init();
}
