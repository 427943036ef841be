use crate::*;

use std::net::SocketAddr;

use canlink_core::block::BLOCK_SIZE;
use canlink_services::UdpBus;

/// Reserve a loopback port by binding and releasing it.
fn free_addr() -> SocketAddr {
    let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    probe.local_addr().unwrap()
}

/// The same two nodes, but over the UDP virtual bus on 127.0.0.1.
#[tokio::test]
async fn test_udp_bus_end_to_end() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let server_layout = layout_in(server_dir.path());
    let client_layout = layout_in(client_dir.path());

    let server_addr = free_addr();
    let client_addr = free_addr();
    let (shutdown, _) = broadcast::channel::<()>(1);

    let (server_bus, server_handle) = UdpBus::bind(server_addr, client_addr, shutdown.subscribe())
        .await
        .unwrap();
    let (client_bus, client_handle) = UdpBus::bind(client_addr, server_addr, shutdown.subscribe())
        .await
        .unwrap();
    let server_bus_task = tokio::spawn(server_bus.run());
    let client_bus_task = tokio::spawn(client_bus.run());

    let actions = TestActions {
        layout: server_layout.clone(),
        log: Arc::new(Mutex::new(Vec::new())),
    };
    let (node, state) = server_node(&server_layout, ShutdownGate::new(), actions);
    {
        let mut s = state.lock();
        s.send_states = false;
        // Keep chunk bursts within the socket buffers.
        s.min_delay = 0.001;
    }
    let server = TestNode::spawn(node, state, server_layout.clone(), server_handle, &shutdown);
    let (node, state) = client_node(&client_layout);
    let mut client = TestNode::spawn(node, state, client_layout.clone(), client_handle, &shutdown);

    // Control round trip.
    server.state.lock().param_1_th = 1.5;
    client.command(Command::GetParam(2)).await;
    let event = client
        .expect("param value", |e| matches!(e, NodeEvent::ParamValue { id: 2, .. }))
        .await
        .unwrap();
    assert_eq!(event, NodeEvent::ParamValue { id: 2, value: 1.5 });

    // A multi-block file.
    let content = pattern(3 * BLOCK_SIZE - 5);
    let source = server_layout.source_path(0);
    std::fs::create_dir_all(source.parent().unwrap()).unwrap();
    std::fs::write(&source, &content).unwrap();

    client.command(Command::FetchDb(0)).await;
    client
        .expect("transfer complete", |e| {
            matches!(e, NodeEvent::TransferComplete { file_id: 0, .. })
        })
        .await
        .unwrap();
    assert_eq!(std::fs::read(client_layout.destination_path(0)).unwrap(), content);

    shutdown.send(()).unwrap();
    server.task.await.unwrap().unwrap();
    client.task.await.unwrap().unwrap();
    server_bus_task.await.unwrap().unwrap();
    client_bus_task.await.unwrap().unwrap();
}
