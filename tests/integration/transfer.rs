use crate::*;

use canlink_core::block::BLOCK_SIZE;

/// Two full blocks: the client pulls database 2 and gets it byte for byte.
#[tokio::test]
async fn test_fetch_db_two_blocks() {
    let mut pair = spawn_pair();
    let content = pattern(2 * BLOCK_SIZE);
    assert_eq!(content.len(), 2640);
    let source = pair.server.layout.source_path(2);
    std::fs::create_dir_all(source.parent().unwrap()).unwrap();
    std::fs::write(&source, &content).unwrap();

    pair.client.command(Command::FetchDb(2)).await;

    let event = pair
        .client
        .expect("transfer complete", |e| matches!(e, NodeEvent::TransferComplete { .. }))
        .await
        .unwrap();
    let NodeEvent::TransferComplete { file_id, path, bytes } = event else {
        unreachable!()
    };
    assert_eq!(file_id, 2);
    assert_eq!(bytes, 2640);
    assert_eq!(path, pair.client.layout.destination_path(2));
    assert_eq!(std::fs::read(&path).unwrap(), content);

    pair.server
        .expect("send complete", |e| {
            matches!(e, NodeEvent::SendComplete { file_id: 2, bytes: 2640 })
        })
        .await
        .unwrap();

    pair.stop().await;
}

/// A file that ends mid-block arrives intact.
#[tokio::test]
async fn test_fetch_db_partial_last_block() {
    let mut pair = spawn_pair();
    let content = pattern(BLOCK_SIZE + 17);
    let source = pair.server.layout.source_path(1);
    std::fs::create_dir_all(source.parent().unwrap()).unwrap();
    std::fs::write(&source, &content).unwrap();

    pair.client.command(Command::FetchDb(1)).await;
    pair.client
        .expect("transfer complete", |e| {
            matches!(e, NodeEvent::TransferComplete { file_id: 1, .. })
        })
        .await
        .unwrap();
    let received = std::fs::read(pair.client.layout.destination_path(1)).unwrap();
    assert_eq!(received, content);

    pair.stop().await;
}

/// Asking for a database that does not exist fails cleanly and leaves no
/// partial file behind.
#[tokio::test]
async fn test_fetch_missing_db_fails() {
    let mut pair = spawn_pair();

    pair.client.command(Command::FetchDb(9)).await;
    pair.client
        .expect("transfer failed", |e| {
            matches!(e, NodeEvent::TransferFailed { file_id: 9, .. })
        })
        .await
        .unwrap();
    assert!(!pair.client.layout.destination_path(9).exists());

    // The link still works afterwards.
    pair.client.command(Command::EnumDb).await;
    pair.client
        .expect("db count", |e| matches!(e, NodeEvent::DbCount(0)))
        .await
        .unwrap();

    pair.stop().await;
}

/// Databases are numbered from 0; clearing the last one shrinks the count.
#[tokio::test]
async fn test_enum_and_clear_db() {
    let mut pair = spawn_pair();
    for id in 0..3u8 {
        let path = pair.server.layout.source_path(id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, [id; 10]).unwrap();
    }

    pair.client.command(Command::EnumDb).await;
    pair.client
        .expect("db count", |e| matches!(e, NodeEvent::DbCount(3)))
        .await
        .unwrap();

    pair.client.command(Command::ClearDb(2)).await;
    pair.client
        .expect("clear ack", |e| {
            matches!(e, NodeEvent::Ack { opcode: canlink_core::Opcode::ClearDb, code: 1 })
        })
        .await
        .unwrap();
    assert!(!pair.server.layout.source_path(2).exists());

    pair.client.command(Command::EnumDb).await;
    pair.client
        .expect("db count", |e| matches!(e, NodeEvent::DbCount(2)))
        .await
        .unwrap();

    pair.stop().await;
}
