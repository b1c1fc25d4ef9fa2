//! One rank of an NCCL all-reduce loop guarded by the commwatch watchdog.
//!
//! Launch one process per GPU with `COMMWATCH_RANK` / `COMMWATCH_WORLD_SIZE`
//! (or an MPI launcher) and a shared `COMMWATCH_MASTER_ADDR`. The device is
//! picked from the rank's position among the processes on its host.

use commwatch::driver::{self, Exit};
use commwatch::{BootstrapConfig, Result, TcpBootstrap, WatchdogConfig};
use commwatch_nccl::NcclTransport;

#[tokio::main]
async fn main() {
    commwatch::logging::init();
    let result = run().await;
    std::process::exit(driver::exit_code(&result));
}

async fn run() -> Result<Exit> {
    let config = WatchdogConfig::from_env();
    let group = BootstrapConfig::from_env()?;
    tracing::debug!(?config, ?group, "starting NCCL rank");

    driver::run(TcpBootstrap::connect(&group), NcclTransport::new, &config).await
}
