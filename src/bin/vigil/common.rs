use tracing_subscriber::{filter::Targets, prelude::*};

use vigil::config::LoggingConfig;

pub fn setup_tracing(config: &LoggingConfig) -> miette::Result<()> {
    let level = config.max_level;

    let mut filter = Targets::new().with_target("vigil", level);

    if config.include_tokio {
        filter = filter.with_target("tokio", level);
    }

    if config.include_reqwest {
        filter = filter
            .with_target("reqwest", level)
            .with_target("hyper", level);
    }

    tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .finish()
        .with(filter)
        .init();

    Ok(())
}
