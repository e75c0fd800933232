//! Two clients negotiate through a real server on a loopback port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parley_client::{
    ConnectionEvent, ConnectionManager, LoopbackConnector, ManagerConfig, SignalingClient,
};
use parley_common::{ClientId, ParleyError, ServerMessage};
use parley_config::ServerConfig;
use parley_server::{scripted_ids, Coordinator};
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(5);

async fn start(ids: Vec<&'static str>) -> SocketAddr {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        mic_slots: 4,
    };
    let coordinator = Coordinator::with_id_source(4, scripted_ids(ids));
    let (addr, _handle) = parley_server::spawn(&config, coordinator).await.unwrap();
    addr
}

async fn connect(addr: SocketAddr) -> (SignalingClient, UnboundedReceiver<ServerMessage>) {
    SignalingClient::connect(&format!("ws://{addr}"), WAIT)
        .await
        .unwrap()
}

async fn wait_for(
    events: &mut UnboundedReceiver<ConnectionEvent>,
    wanted: &ConnectionEvent,
) {
    tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(event) if &event == wanted => return,
                Some(_) => continue,
                None => panic!("event stream ended before {wanted:?}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {wanted:?}"));
}

fn id(s: &str) -> ClientId {
    ClientId::from(s)
}

#[tokio::test]
async fn signaling_client_learns_its_id_first() {
    let addr = start(vec!["x1"]).await;
    let (client, mut inbound) = connect(addr).await;
    assert_eq!(client.id(), &id("x1"));

    client.join_room("lobby", None).unwrap();
    let first = tokio::time::timeout(WAIT, inbound.recv()).await.unwrap();
    assert_eq!(first, Some(ServerMessage::ExistingUsers { users: vec![] }));
    client.close().await;
}

#[tokio::test]
async fn connect_to_dead_port_fails() {
    let err = SignalingClient::connect("ws://127.0.0.1:1", Duration::from_secs(2))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ParleyError::Network(_)));
}

#[tokio::test]
async fn two_managers_form_a_link_and_tear_it_down() {
    let addr = start(vec!["x1", "y1"]).await;

    let (x_client, x_inbound) = connect(addr).await;
    let (x_manager, mut x_events) = ConnectionManager::new(
        x_client.id().clone(),
        ManagerConfig::default(),
        Arc::new(LoopbackConnector),
        x_client.sender(),
    );
    let x = x_manager.spawn(x_inbound);
    x.join_room("lobby", Some("ex".into()));

    let (y_client, y_inbound) = connect(addr).await;
    let (y_manager, mut y_events) = ConnectionManager::new(
        y_client.id().clone(),
        ManagerConfig::default(),
        Arc::new(LoopbackConnector),
        y_client.sender(),
    );
    let y = y_manager.spawn(y_inbound);
    y.join_room("lobby", Some("why".into()));

    // x1 offers, y1 answers; both report the link up.
    wait_for(&mut y_events, &ConnectionEvent::PeerConnected(id("x1"))).await;
    wait_for(&mut x_events, &ConnectionEvent::PeerConnected(id("y1"))).await;

    // Muting is local and leaves the link alone.
    x.set_muted(true);
    assert!(x.is_muted());

    y_client.close().await;
    wait_for(&mut x_events, &ConnectionEvent::PeerClosed(id("y1"))).await;
    wait_for(&mut x_events, &ConnectionEvent::MembersChanged(vec![])).await;
    y.abort();
}
