use env_logger::{Builder, Env, Target};
use std::io::Write;

/// Installs the process-wide logger.
///
/// Defaults to `info`; `RUST_LOG` overrides the filter as usual.
pub fn setup_logging() {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));

    builder
        .target(Target::Stdout)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
