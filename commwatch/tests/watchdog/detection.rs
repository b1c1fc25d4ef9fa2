use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use commwatch::{
    AbortPolicy, AsyncErrorCode, CollectiveLoop, CommError, CommState, DataType, HealthCheck,
    LocalTransport, MonitoredComm, Transport, Watchdog,
};
use tokio_util::sync::CancellationToken;

use super::helpers::{ScriptedTransport, wait_for};

#[test]
fn fault_on_third_check_fails_fourth_step() {
    let transport = ScriptedTransport::fault_on_check(3);
    let script = transport.script();
    let comm = Arc::new(MonitoredComm::new(transport, super::helpers::ScriptedComm, 0, 1));
    let mut fg = CollectiveLoop::new(Arc::clone(&comm), vec![1.0; 4], vec![0.0; 4], 4);

    for _ in 0..2 {
        fg.step().unwrap();
        assert_eq!(comm.check_health().unwrap(), HealthCheck::Healthy);
    }
    fg.step().unwrap();
    assert!(matches!(
        comm.check_health().unwrap(),
        HealthCheck::Aborted {
            code: AsyncErrorCode::UnrecoverableTransportError,
            ..
        }
    ));
    assert_eq!(script.aborts.load(Ordering::SeqCst), 1);

    let err = fg.step().unwrap_err();
    assert!(matches!(err, CommError::TransportSync { .. }));
    assert_eq!(fg.iterations(), 3);
    assert_eq!(script.ops.load(Ordering::SeqCst), 4);
}

#[test]
fn fail_fast_rejects_the_step_before_the_transport() {
    let transport = ScriptedTransport::fault_on_check(1);
    let script = transport.script();
    let comm = Arc::new(
        MonitoredComm::new(transport, super::helpers::ScriptedComm, 0, 1)
            .with_policy(AbortPolicy::FailFast),
    );
    let mut fg = CollectiveLoop::new(Arc::clone(&comm), vec![1.0], vec![0.0], 1);

    comm.check_health().unwrap();
    assert!(matches!(
        fg.step().unwrap_err(),
        CommError::CommAborted { rank: 0 }
    ));
    assert_eq!(script.ops.load(Ordering::SeqCst), 0);
}

#[test]
fn drop_after_abort_never_destroys() {
    let transport = ScriptedTransport::fault_on_check(1);
    let script = transport.script();
    let comm = MonitoredComm::new(transport, super::helpers::ScriptedComm, 0, 1);
    comm.check_health().unwrap();
    drop(comm);
    assert_eq!(script.aborts.load(Ordering::SeqCst), 1);
    assert_eq!(script.destroys.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watchdog_aborts_injected_fault() {
    let t = LocalTransport::new();
    let id = LocalTransport::generate_rendezvous_id().unwrap();
    let raw = t.create_communicator(1, &id, 0).unwrap();
    let comm = Arc::new(MonitoredComm::new(t, raw.clone(), 0, 1));

    let token = CancellationToken::new();
    let handle = Watchdog::new(Duration::from_millis(1)).spawn(Arc::clone(&comm), token.clone());

    // A few healthy polls first.
    assert!(
        wait_for(Duration::from_secs(5), || {
            comm.fault_state().unwrap().checks >= 3
        })
        .await
    );
    assert_eq!(comm.state().unwrap(), CommState::Healthy);

    raw.inject_async_error(AsyncErrorCode::RecoverableTransportError);
    assert!(
        wait_for(Duration::from_secs(5), || {
            comm.state().unwrap() == CommState::Aborted
        })
        .await
    );

    // Still polling after the abort, without touching the transport again.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());
    assert_eq!(raw.abort_count(), 1);

    token.cancel();
    let res = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(res.is_ok());
    assert!(comm.fault_state().unwrap().abort_elapsed.is_some());
}

#[tokio::test]
async fn watchdog_stops_on_cancel() {
    let comm = Arc::new(MonitoredComm::new(
        ScriptedTransport::healthy(),
        super::helpers::ScriptedComm,
        0,
        1,
    ));
    let token = CancellationToken::new();
    let handle = Watchdog::new(Duration::from_millis(2)).spawn(Arc::clone(&comm), token.clone());

    tokio::time::sleep(Duration::from_millis(20)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(comm.state().unwrap(), CommState::Healthy);
    assert!(comm.fault_state().unwrap().checks > 0);
}

#[test]
fn abort_on_one_rank_fails_the_peer() {
    let id = LocalTransport::generate_rendezvous_id().unwrap();
    let t = LocalTransport::new();
    let raw0 = t.create_communicator(2, &id, 0).unwrap();
    let raw1 = t.create_communicator(2, &id, 1).unwrap();
    let comm0 = Arc::new(MonitoredComm::new(t, raw0, 0, 2));
    let comm1 = Arc::new(MonitoredComm::new(t, raw1.clone(), 1, 2));

    let token = CancellationToken::new();
    let loops: Vec<_> = [&comm0, &comm1]
        .into_iter()
        .map(|comm| {
            let fg = CollectiveLoop::new(
                Arc::clone(comm),
                commwatch::HostBuffer::from_f32(&[1.0, 2.0]),
                commwatch::HostBuffer::zeroed(2, DataType::F32),
                2,
            )
            .with_interval(Duration::from_millis(1));
            let token = token.clone();
            std::thread::spawn(move || fg.run(token))
        })
        .collect();

    std::thread::sleep(Duration::from_millis(20));
    raw1.inject_async_error(AsyncErrorCode::UnrecoverableTransportError);
    assert!(matches!(
        comm1.check_health().unwrap(),
        HealthCheck::Aborted { .. }
    ));

    for handle in loops {
        let err = handle.join().unwrap().err().unwrap();
        assert!(matches!(err, CommError::TransportSync { .. }));
    }
    assert_eq!(comm0.state().unwrap(), CommState::Healthy);
}

#[test]
fn failed_abort_is_not_retried() {
    let transport = ScriptedTransport::failing_abort_on_check(1);
    let script = transport.script();
    let comm = MonitoredComm::new(transport, super::helpers::ScriptedComm, 0, 1);

    let err = comm.check_health().unwrap_err();
    assert!(matches!(
        err,
        CommError::TransportSync {
            operation: "abort",
            ..
        }
    ));
    assert_eq!(comm.state().unwrap(), CommState::Aborting);
    assert!(comm.fault_state().unwrap().abort_elapsed.is_none());

    // Later checks neither query nor abort again.
    assert_eq!(
        comm.check_health().unwrap(),
        HealthCheck::Inactive(CommState::Aborting)
    );
    assert_eq!(script.checks.load(Ordering::SeqCst), 1);
    assert_eq!(script.aborts.load(Ordering::SeqCst), 1);

    comm.destroy().unwrap();
    assert_eq!(comm.state().unwrap(), CommState::Released);
    assert_eq!(script.destroys.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn watchdog_returns_failed_abort() {
    let transport = ScriptedTransport::failing_abort_on_check(2);
    let script = transport.script();
    let comm = Arc::new(MonitoredComm::new(
        transport,
        super::helpers::ScriptedComm,
        0,
        1,
    ));
    let token = CancellationToken::new();
    let handle = Watchdog::new(Duration::from_millis(1)).spawn(Arc::clone(&comm), token.clone());

    let res = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(
        res,
        Err(CommError::TransportSync {
            operation: "abort",
            ..
        })
    ));
    assert!(!token.is_cancelled());
    assert_eq!(script.aborts.load(Ordering::SeqCst), 1);
    assert_eq!(comm.state().unwrap(), CommState::Aborting);
}
