use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;
use std::str::FromStr;
use log::info;

fn level_from_env() -> LevelFilter {
    std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|raw| LevelFilter::from_str(raw.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

// Custom logger setup
pub fn setup_logger() {
    let level = level_from_env();
    let mut builder = Builder::from_default_env();

    builder
        .format(|buf, record| {
            // Choose color based on log level
            let level_color = match record.level() {
                log::Level::Error => "\x1B[1;31m", // Bold Red
                log::Level::Warn => "\x1B[1;33m",  // Bold Yellow
                log::Level::Info => "\x1B[1;32m",  // Bold Green
                log::Level::Debug => "\x1B[1;36m", // Bold Cyan
                log::Level::Trace => "\x1B[1;35m", // Bold Magenta
            };
            let reset = "\x1B[0m";

            writeln!(
                buf,
                "[{}] {}{}{} [{}:{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                level_color,
                record.level(),
                reset,
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .filter(None, level)
        // rdkafka and hyper are chatty below warn
        .filter(Some("rdkafka"), LevelFilter::Warn)
        .filter(Some("hyper"), LevelFilter::Warn);

    if builder.try_init().is_ok() {
        info!("Logger initialized at {} level", level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parses_case_insensitively() {
        std::env::set_var("LOG_LEVEL", "DEBUG");
        assert_eq!(level_from_env(), LevelFilter::Debug);
        std::env::set_var("LOG_LEVEL", "loud");
        assert_eq!(level_from_env(), LevelFilter::Info);
        std::env::remove_var("LOG_LEVEL");
        assert_eq!(level_from_env(), LevelFilter::Info);
    }
}
