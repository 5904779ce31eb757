use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

const DEFAULT_FILTER: &str = "warn,voice_clone_job=info";

pub fn init_logger(verbose: bool) {
    // RUST_LOG wins over the default filter
    let env = Env::default().filter_or("RUST_LOG", DEFAULT_FILTER);

    let mut builder = Builder::from_env(env);

    if verbose {
        builder.filter_module("voice_clone_job", LevelFilter::Debug);
    }

    builder
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("reqwest", LevelFilter::Info)
        .filter_module("symphonia", LevelFilter::Warn)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        // stdout is reserved for the RESULT_URL line
        .target(env_logger::Target::Stderr)
        .init();
}
