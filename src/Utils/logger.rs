use chrono::Local;
use log::LevelFilter;
use simplelog::*;
use std::fs::File;

/// Maps the solver verbosity option to a log level:
/// 0 - warnings only, 1 - info, 2 and above - debug.
pub fn level_from_verbosity(verbosity: usize) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

/// Initialize console logging. Safe to call more than once, later calls are
/// ignored by the logger backend.
pub fn init_console_logging(level: LevelFilter) {
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

/// Initialize console logging plus a log file stamped with the current
/// date and time.
pub fn init_logging_with_file(level: LevelFilter, file_prefix: &str) {
    let filename = format!(
        "{}_{}.log",
        file_prefix,
        Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Ok(file) = File::create(&filename) {
        loggers.push(WriteLogger::new(level, Config::default(), file));
    }
    let _ = CombinedLogger::init(loggers);
}
