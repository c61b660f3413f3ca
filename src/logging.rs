use anyhow::Error;
use log::LevelFilter;
use log4rs::{
    Handle,
    append::console::{ConsoleAppender, Target},
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

const APPENDER: &str = "stderr";
const PATTERN: &str = "{h({l:<5})} {t} - {m}{n}";

/// Maps the number of `-v` flags to a log level. Warnings are always shown.
pub fn level_filter(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Installs a log4rs logger writing to stderr, so that stdout only carries
/// the dump itself.
pub fn init(verbosity: u8) -> Result<Handle, Error> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build(APPENDER, Box::new(stderr)))
        .build(
            Root::builder()
                .appender(APPENDER)
                .build(level_filter(verbosity)),
        )?;

    Ok(log4rs::init_config(config)?)
}
