use std::time::Duration;

use commwatch::bootstrap::{discover_local_rank_as, exchange_rendezvous_id};
use commwatch::{Bootstrap, LocalBootstrap, LocalTransport, RendezvousId, TcpBootstrap};
use futures::future::try_join_all;
use tokio::net::TcpListener;

const HOSTS: [&str; 5] = ["node-a", "node-a", "node-b", "node-b", "node-b"];

/// Run host discovery, id exchange and finalize on one rank.
async fn form_group<B: Bootstrap>(b: B) -> (RendezvousId, usize) {
    let local = discover_local_rank_as(&b, HOSTS[b.rank() as usize])
        .await
        .unwrap();
    let id = exchange_rendezvous_id::<LocalTransport, _>(&b).await.unwrap();
    b.finalize().await.unwrap();
    (id, local)
}

fn assert_group(results: Vec<(RendezvousId, usize)>) {
    let root = results[0].0;
    assert_ne!(root, RendezvousId::zeroed());
    for (id, _) in &results {
        assert_eq!(id.as_bytes(), root.as_bytes());
    }
    let locals: Vec<usize> = results.iter().map(|(_, l)| *l).collect();
    assert_eq!(locals, vec![0, 1, 0, 1, 2]);
}

#[tokio::test]
async fn local_root_and_four_peers_share_id() {
    let mut handles = Vec::new();
    for b in LocalBootstrap::group(5) {
        handles.push(tokio::spawn(form_group(b)));
    }
    let results = try_join_all(handles).await.unwrap();
    assert_group(results);
}

#[tokio::test]
async fn tcp_root_and_four_peers_share_id() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let timeout = Duration::from_secs(10);

    let mut handles = vec![tokio::spawn(async move {
        let hub = TcpBootstrap::hub(listener, 5, timeout).await.unwrap();
        form_group(hub).await
    })];
    for rank in 1..5 {
        handles.push(tokio::spawn(async move {
            let spoke = TcpBootstrap::spoke(addr, rank, 5, timeout).await.unwrap();
            form_group(spoke).await
        }));
    }

    let results = try_join_all(handles).await.unwrap();
    assert_group(results);
}

#[tokio::test]
async fn tcp_hub_rejects_out_of_range_rank() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let timeout = Duration::from_secs(10);

    let hub = tokio::spawn(TcpBootstrap::hub(listener, 2, timeout));
    let _spoke = TcpBootstrap::spoke(addr, 7, 2, timeout).await.unwrap();
    assert!(matches!(
        hub.await.unwrap(),
        Err(commwatch::CommError::InvalidRank { rank: 7, .. })
    ));
}

#[tokio::test]
async fn tcp_broadcast_from_non_zero_root() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let timeout = Duration::from_secs(10);

    let mut handles = vec![tokio::spawn(async move {
        let hub = TcpBootstrap::hub(listener, 3, timeout).await.unwrap();
        let mut buf = [0u8; 3];
        hub.broadcast(&mut buf, 2).await.unwrap();
        buf
    })];
    for rank in 1..3 {
        handles.push(tokio::spawn(async move {
            let spoke = TcpBootstrap::spoke(addr, rank, 3, timeout).await.unwrap();
            let mut buf = if rank == 2 { [4u8, 5, 6] } else { [0u8; 3] };
            spoke.broadcast(&mut buf, 2).await.unwrap();
            buf
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap(), [4, 5, 6]);
    }
}
