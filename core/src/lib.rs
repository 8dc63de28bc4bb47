//! Shared primitives for the Emberfall combat core: geometry and timers,
//! the stat-vector layout, the keyed config file parser, engine settings,
//! the seeded session RNG, and the outbound message queues.

use log::{LevelFilter, SetLoggerError};
use log4rs::{
    append::{
        console::{ConsoleAppender, Target},
        file::FileAppender,
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
    filter::threshold::ThresholdFilter,
};

pub mod file_parser;
pub mod geometry;
pub mod message;
pub mod parse;
pub mod rng;
pub mod settings;
pub mod stats;
pub mod timer;

/// Set up the process-wide logger: stderr at the requested level, plus an
/// optional trace-level file appender.
pub fn initialize_logger(
    log_level: LevelFilter,
    file_path: Option<&str>,
) -> Result<(), SetLoggerError> {
    let stderr = ConsoleAppender::builder().target(Target::Stderr).build();

    let mut config_builder = Config::builder();
    let mut root_builder = Root::builder();

    if let Some(path) = file_path {
        match FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d} {l} - {m}\n")))
            .build(path)
        {
            Ok(logfile) => {
                config_builder = config_builder
                    .appender(Appender::builder().build("logfile", Box::new(logfile)));
                root_builder = root_builder.appender("logfile");
            }
            Err(e) => {
                eprintln!("could not open log file '{}': {}", path, e);
            }
        }
    }

    let config = config_builder
        .appender(
            Appender::builder()
                .filter(Box::new(ThresholdFilter::new(log_level)))
                .build("stderr", Box::new(stderr)),
        )
        .build(root_builder.appender("stderr").build(log_level))
        .expect("logger config is statically valid");

    let _handle = log4rs::init_config(config)?;

    Ok(())
}
