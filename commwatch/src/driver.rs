//! Process driver: form the group, build the monitored communicator, and run
//! the watchdog next to the foreground loop until a signal or the iteration
//! bound ends the process.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bootstrap::{Bootstrap, discover_local_rank, exchange_rendezvous_id};
use crate::collective::CollectiveLoop;
use crate::comm::MonitoredComm;
use crate::config::WatchdogConfig;
use crate::error::{CommError, Result};
use crate::signal::ShutdownSignals;
use crate::transport::Transport;
use crate::types::DataType;
use crate::watchdog::Watchdog;

/// How a driver run ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The foreground loop reached its iteration bound and everything was
    /// released in order.
    Completed { iterations: u64 },
    /// A termination signal arrived. Nothing was torn down.
    Signalled(i32),
}

/// Run one rank to completion.
///
/// `connect` joins the bootstrap group. Signals are registered before it is
/// first polled, so a rank still waiting for its peers exits cleanly on
/// `SIGTERM`. `make_transport` receives the rank's index among the
/// processes on its host, which picks the device.
pub async fn run<T, B, C, F>(connect: C, make_transport: F, config: &WatchdogConfig) -> Result<Exit>
where
    T: Transport,
    B: Bootstrap,
    C: Future<Output = Result<B>>,
    F: FnOnce(usize) -> Result<T> + Send,
{
    let mut signals = ShutdownSignals::install()?;
    let token = CancellationToken::new();

    let work = async {
        let bootstrap = connect.await?;
        run_group(&bootstrap, make_transport, config, token.clone()).await
    };

    tokio::select! {
        biased;
        signo = signals.recv() => {
            tracing::info!("received signal {signo}, exiting");
            // Lets the blocking loop wind down if the process keeps running.
            token.cancel();
            Ok(Exit::Signalled(signo))
        }
        res = work => res.map(|iterations| Exit::Completed { iterations }),
    }
}

async fn run_group<T, B, F>(
    bootstrap: &B,
    make_transport: F,
    config: &WatchdogConfig,
    token: CancellationToken,
) -> Result<u64>
where
    T: Transport,
    B: Bootstrap,
    F: FnOnce(usize) -> Result<T>,
{
    let rank = bootstrap.rank();
    let world_size = bootstrap.world_size();

    let local_rank = discover_local_rank(bootstrap).await?;
    let id = exchange_rendezvous_id::<T, B>(bootstrap).await?;
    bootstrap.finalize().await?;

    let transport = make_transport(local_rank)?;
    let count = config.element_count;
    let send = transport.allocate(count, DataType::F32)?;
    let recv = transport.allocate(count, DataType::F32)?;

    // Communicator creation blocks until every rank has joined.
    let (transport, raw) = tokio::task::spawn_blocking(move || {
        let raw = transport.create_communicator(world_size, &id, rank);
        (transport, raw)
    })
    .await
    .map_err(|e| CommError::task("communicator setup", e))?;
    let raw = raw?;
    tracing::info!(
        rank,
        world_size,
        local_rank,
        transport = transport.name(),
        "communicator ready"
    );

    let comm = Arc::new(
        MonitoredComm::new(transport, raw, rank, world_size).with_policy(config.abort_policy),
    );

    // Stops both loops on every way out of this function.
    let _stop = token.clone().drop_guard();

    let mut watchdog =
        Watchdog::new(config.health_interval).spawn(Arc::clone(&comm), token.clone());

    let foreground = CollectiveLoop::new(Arc::clone(&comm), send, recv, count)
        .with_interval(config.op_interval)
        .with_max_iterations(config.max_iterations);
    let loop_token = token.clone();
    let mut foreground = tokio::task::spawn_blocking(move || foreground.run(loop_token));

    let finished = tokio::select! {
        res = &mut foreground => res.map_err(|e| CommError::task("collective loop", e))??,
        res = &mut watchdog => {
            // The watchdog only returns on its own when a health query fails.
            return Err(match res {
                Ok(Err(e)) => e,
                Ok(Ok(())) => CommError::Cancelled,
                Err(e) => CommError::task("watchdog", e),
            });
        }
    };

    let iterations = finished.iterations();
    token.cancel();
    watchdog
        .await
        .map_err(|e| CommError::task("watchdog", e))??;

    let (send, recv) = finished.into_buffers();
    drop(send);
    drop(recv);
    comm.destroy()?;

    tracing::info!(rank, iterations, "rank {rank} success");
    Ok(iterations)
}

/// Log the outcome and map it to a process exit status.
pub fn exit_code(result: &Result<Exit>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(e) => {
            tracing::error!(category = e.category(), "fatal: {e}");
            1
        }
    }
}
