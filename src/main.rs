use clap::Parser;
use tracing::error;

use keymutexd::config::{Cli, Config};
use keymutexd::listener::EventLoop;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let mut event_loop = match EventLoop::new(&config) {
        Ok(event_loop) => event_loop,
        Err(e) => {
            error!(error = %e, "failed to start");
            std::process::exit(1);
        }
    };

    event_loop.run();
}
