use std::time::Duration;

use commwatch::driver::{self, Exit};
use commwatch::{CommError, LocalBootstrap, LocalTransport, WatchdogConfig};

use super::helpers::{ScriptedTransport, ready};

fn quick_config(max_iterations: u64) -> WatchdogConfig {
    WatchdogConfig {
        health_interval: Duration::from_millis(1),
        op_interval: Duration::from_millis(1),
        element_count: 64,
        max_iterations,
        ..WatchdogConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn four_ranks_complete_and_release() {
    let mut handles = Vec::new();
    for b in LocalBootstrap::group(4) {
        handles.push(tokio::spawn(async move {
            driver::run(ready(b), |_| Ok(LocalTransport::new()), &quick_config(5)).await
        }));
    }
    for h in handles {
        let exit = tokio::time::timeout(Duration::from_secs(30), h)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(exit, Exit::Completed { iterations: 5 });
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_rank_reaches_transport_factory() {
    let mut handles = Vec::new();
    for b in LocalBootstrap::group(2) {
        handles.push(tokio::spawn(async move {
            let mut seen = None;
            let exit = driver::run(
                ready(b),
                |local_rank| {
                    seen = Some(local_rank);
                    Ok(LocalTransport::new())
                },
                &quick_config(1),
            )
            .await
            .unwrap();
            (exit, seen)
        }));
    }
    let mut locals = Vec::new();
    for h in handles {
        let (exit, seen) = h.await.unwrap();
        assert_eq!(exit, Exit::Completed { iterations: 1 });
        locals.push(seen.unwrap());
    }
    // Same process, same host: ranks count up from zero.
    assert_eq!(locals, vec![0, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detected_fault_ends_run_with_transport_error() {
    let bootstrap = LocalBootstrap::group(1).remove(0);
    let result = tokio::time::timeout(
        Duration::from_secs(30),
        driver::run(
            ready(bootstrap),
            |_| Ok(ScriptedTransport::fault_on_check(3)),
            &quick_config(0),
        ),
    )
    .await
    .unwrap();

    let err = result.unwrap_err();
    assert!(matches!(err, CommError::TransportSync { .. }));
    assert_eq!(driver::exit_code(&Err(err)), 1);
}

#[tokio::test]
async fn transport_factory_error_is_fatal() {
    let bootstrap = LocalBootstrap::group(1).remove(0);
    let result = driver::run::<LocalTransport, _, _, _>(
        ready(bootstrap),
        |_| Err(CommError::device("no device for local rank")),
        &quick_config(1),
    )
    .await;
    assert!(matches!(result, Err(CommError::Device { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_abort_ends_run_with_abort_error() {
    let bootstrap = LocalBootstrap::group(1).remove(0);
    let result = tokio::time::timeout(
        Duration::from_secs(30),
        driver::run(
            ready(bootstrap),
            |_| Ok(ScriptedTransport::failing_abort_on_check(2)),
            &quick_config(0),
        ),
    )
    .await
    .unwrap();

    let err = result.unwrap_err();
    assert!(matches!(
        err,
        CommError::TransportSync {
            operation: "abort",
            ..
        }
    ));
    assert_eq!(driver::exit_code(&Err(err)), 1);
}

#[tokio::test]
async fn bootstrap_failure_is_fatal() {
    let result = driver::run::<LocalTransport, LocalBootstrap, _, _>(
        async { Err(CommError::bootstrap("hub unreachable")) },
        |_| Ok(LocalTransport::new()),
        &quick_config(1),
    )
    .await;
    assert!(matches!(result, Err(CommError::Bootstrap { .. })));
}
