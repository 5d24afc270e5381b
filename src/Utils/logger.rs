use log::warn;
use simplelog::*;
use std::fs::File;

/// Sets up the global logger: colored terminal output and/or a log file.
///
/// The global logger can be installed only once per process; later calls keep the
/// first configuration.
pub fn init_logger(level: LevelFilter, log_to_file: Option<&str>, log_to_console: bool) {
    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();

    if log_to_console {
        loggers.push(TermLogger::new(
            level,
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ));
    }

    let mut file_error = None;
    if let Some(filename) = log_to_file {
        match File::create(filename) {
            Ok(file) => loggers.push(WriteLogger::new(level, Config::default(), file)),
            Err(e) => file_error = Some(format!("cannot create log file {}: {}", filename, e)),
        }
    }

    if !loggers.is_empty() {
        let _ = CombinedLogger::init(loggers);
    }
    if let Some(message) = file_error {
        warn!("{}", message);
    }
}
