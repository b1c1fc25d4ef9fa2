//! Run the monitored collective loop over the in-process CPU transport.
//! Environment, signals and exit codes match the NCCL binary. The group may
//! form across processes, but the CPU fabric only spans one, so a world
//! size above one fails once the transport is chosen.

use commwatch::driver::{self, Exit};
use commwatch::{BootstrapConfig, CommError, LocalTransport, Result, TcpBootstrap, WatchdogConfig};

#[tokio::main]
async fn main() {
    commwatch::logging::init();
    let result = run().await;
    std::process::exit(driver::exit_code(&result));
}

async fn run() -> Result<Exit> {
    let config = WatchdogConfig::from_env();
    let group = BootstrapConfig::from_env()?;
    tracing::debug!(?config, ?group, "starting simulated rank");

    let world_size = group.world_size;
    let make_transport = move |_local_rank: usize| {
        if world_size > 1 {
            return Err(CommError::Config {
                key: "COMMWATCH_WORLD_SIZE",
                value: world_size.to_string(),
            });
        }
        Ok(LocalTransport::new())
    };
    driver::run(TcpBootstrap::connect(&group), make_transport, &config).await
}
