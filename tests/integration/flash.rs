use crate::*;

use canlink_core::opcode::REFLASH;
use canlink_core::{Opcode, ShutdownKind, TransferCode};

fn write_app(dir: &Path, version: &str) {
    std::fs::create_dir_all(dir.join("bin")).unwrap();
    std::fs::write(dir.join("VERSION"), version).unwrap();
    std::fs::write(dir.join("bin").join("sensor"), pattern(3000)).unwrap();
}

/// Stage a package on the client, upload it, flash, and find the new app
/// directory on the server with the old one backed up.
#[tokio::test]
async fn test_upload_then_flash() {
    let mut pair = spawn_pair();
    write_app(pair.server.layout.app_dir(), "1.0");

    let staging = pair.client_dir.path().join("release");
    write_app(&staging, "2.0");
    flashing::prepare(&staging, &pair.client.layout).unwrap();

    pair.client.command(Command::Upload).await;
    pair.server
        .expect("package received", |e| {
            matches!(e, NodeEvent::TransferComplete { file_id: REFLASH, .. })
        })
        .await
        .unwrap();
    pair.client
        .expect("package sent", |e| matches!(e, NodeEvent::SendComplete { file_id: REFLASH, .. }))
        .await
        .unwrap();
    assert_eq!(
        std::fs::read(pair.server.layout.flash_in()).unwrap(),
        std::fs::read(pair.client.layout.flash_out()).unwrap()
    );

    pair.client.command(Command::Shutdown(ShutdownKind::Flash)).await;
    pair.client
        .expect("shutdown accepted", |e| {
            *e == NodeEvent::Ack {
                opcode: Opcode::Shutdown,
                code: TransferCode::None as u8,
            }
        })
        .await
        .unwrap();
    assert!(pair.gate.is_requested());

    // Stand in for the measurement workflow.
    pair.gate.mark_ready();
    pair.client
        .expect("shutdown confirmed", |e| {
            *e == NodeEvent::Ack {
                opcode: Opcode::Shutdown,
                code: TransferCode::Ok as u8,
            }
        })
        .await
        .unwrap();
    pair.server
        .expect("shutdown executed", |e| {
            matches!(e, NodeEvent::ShutdownExecuted(ShutdownKind::Flash))
        })
        .await
        .unwrap();

    let server = pair.server.task.await.unwrap().unwrap();
    assert!(server.is_finished());
    assert_eq!(*pair.actions.lock().unwrap(), vec!["apply_flash", "reboot"]);

    let app = pair.server.layout.app_dir();
    assert_eq!(std::fs::read_to_string(app.join("VERSION")).unwrap(), "2.0");
    assert_eq!(std::fs::read(app.join("bin").join("sensor")).unwrap(), pattern(3000));
    assert!(pair.server.layout.backup().is_file());

    let _ = pair.shutdown.send(());
    let _ = pair.client.task.await;
}

/// Flashing before anything was uploaded is refused and nothing runs.
#[tokio::test]
async fn test_flash_without_upload_is_refused() {
    let mut pair = spawn_pair();

    pair.client.command(Command::Shutdown(ShutdownKind::Flash)).await;
    pair.client
        .expect("refusal", |e| {
            *e == NodeEvent::Ack {
                opcode: Opcode::Shutdown,
                code: TransferCode::FlashError as u8,
            }
        })
        .await
        .unwrap();
    assert!(!pair.gate.is_requested());
    assert!(pair.actions.lock().unwrap().is_empty());

    pair.stop().await;
}

/// Uploading with nothing staged leaves the server without a package.
#[tokio::test]
async fn test_upload_without_package() {
    let mut pair = spawn_pair();

    pair.client.command(Command::Upload).await;
    pair.server
        .expect("receive failed", |e| {
            matches!(e, NodeEvent::TransferFailed { file_id: REFLASH, .. })
        })
        .await
        .unwrap();
    assert!(!pair.server.layout.flash_in().exists());

    pair.stop().await;
}
