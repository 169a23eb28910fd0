//! Logging setup (ambient stack, `spec.md` §6): a thin wrapper around
//! `log4rs`, matching the teacher's `init_for_db_in` shape with the
//! audit/metrics appenders dropped — this crate has no observability
//! surface to feed them.

use std::fs;
use std::path::{Path, PathBuf};

/// Initialize logging from `log4rs.yaml` in the working directory, if
/// present. Silently does nothing if the file is absent or malformed —
/// callers that want guaranteed logging should use [`init_for_db_in`].
pub fn init() {
    let _ = log4rs::init_file("log4rs.yaml", log4rs::config::Deserializers::default());
}

/// Initialize logging to `{base_dir}/{db_name}_logs/{db_name}.log`, a
/// size-triggered rolling file appender with a 7-generation window.
///
/// # Errors
/// Returns an error if the log directory cannot be created or the
/// `log4rs` config fails to build.
pub fn init_for_db_in(base_dir: &Path, db_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    use log::LevelFilter;
    use log4rs::append::rolling_file::RollingFileAppender;
    use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
    use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
    use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
    use log4rs::config::{Appender, Config, Root};
    use log4rs::encode::pattern::PatternEncoder;

    let mut dir = PathBuf::from(base_dir);
    dir.push(format!("{db_name}_logs"));
    fs::create_dir_all(&dir)?;

    let log_path = dir.join(format!("{db_name}.log"));
    let roller_pattern = dir.join(format!("{db_name}.{{}}.log"));
    let roller = FixedWindowRoller::builder().build(&roller_pattern.display().to_string(), 7)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(10 * 1024 * 1024)), Box::new(roller));
    let encoder = Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}"));
    let appender = RollingFileAppender::builder().encoder(encoder).build(log_path, Box::new(policy))?;

    let config = Config::builder()
        .appender(Appender::builder().build("file", Box::new(appender)))
        .build(Root::builder().appender("file").build(LevelFilter::Info))?;
    log4rs::init_config(config)?;
    Ok(())
}
