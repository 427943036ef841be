use crate::*;

use canlink_core::{Opcode, TransferCode};
use canlink_services::ProgressRecord;

fn ack(opcode: Opcode, code: TransferCode) -> impl FnMut(&NodeEvent) -> bool {
    move |e| *e == NodeEvent::Ack { opcode, code: code as u8 }
}

/// SET_PARAM on min_delay is acknowledged and reads back over GET_PARAM.
#[tokio::test]
async fn test_set_then_get_min_delay() {
    let mut pair = spawn_pair();

    pair.client.command(Command::SetParam { id: 4, value: 0.25 }).await;
    pair.client.expect("set ack", ack(Opcode::SetParam, TransferCode::Ok)).await.unwrap();
    assert_eq!(pair.server.state.lock().min_delay, 0.25);

    pair.client.command(Command::GetParam(4)).await;
    let event = pair
        .client
        .expect("param value", |e| matches!(e, NodeEvent::ParamValue { id: 4, .. }))
        .await
        .unwrap();
    assert_eq!(event, NodeEvent::ParamValue { id: 4, value: 0.25 });

    pair.stop().await;
}

/// Measured values are read-only and min_delay rejects negatives, while
/// thresholds take any finite value.
#[tokio::test]
async fn test_param_access_control() {
    let mut pair = spawn_pair();

    for id in [0, 1] {
        pair.client.command(Command::SetParam { id, value: 1.0 }).await;
        pair.client.expect("error ack", ack(Opcode::SetParam, TransferCode::Error)).await.unwrap();
    }
    {
        let s = pair.server.state.lock();
        assert_eq!(s.measurements.param_1, 0.0);
        assert_eq!(s.measurements.param_2, 0.0);
    }

    pair.client.command(Command::SetParam { id: 4, value: -0.5 }).await;
    pair.client.expect("error ack", ack(Opcode::SetParam, TransferCode::Error)).await.unwrap();
    assert_eq!(pair.server.state.lock().min_delay, 0.0);

    pair.client.command(Command::SetParam { id: 2, value: -3.0 }).await;
    pair.client.expect("ok ack", ack(Opcode::SetParam, TransferCode::Ok)).await.unwrap();
    assert_eq!(pair.server.state.lock().param_1_th, -3.0);

    pair.server.state.lock().measurements.param_1 = 7.5;
    pair.client.command(Command::GetParam(0)).await;
    let event = pair
        .client
        .expect("param value", |e| matches!(e, NodeEvent::ParamValue { id: 0, .. }))
        .await
        .unwrap();
    assert_eq!(event, NodeEvent::ParamValue { id: 0, value: 7.5 });

    pair.stop().await;
}

/// Five queued records are reported by GET_QUE_LENGTH and come out oldest
/// first as complete records.
#[tokio::test]
async fn test_queue_length_and_items() {
    let mut pair = spawn_pair();
    for i in 0..5 {
        pair.server.state.enqueue_status(ProgressRecord {
            index: i as f32,
            particles: (10 + i) as f32,
            free_space_mb: 512.0,
            ..Default::default()
        });
    }

    pair.client.command(Command::QueueLength).await;
    pair.client
        .expect("queue length", |e| matches!(e, NodeEvent::QueueLength(5)))
        .await
        .unwrap();

    pair.client.command(Command::QueueItem).await;
    let event = pair
        .client
        .expect("record", |e| matches!(e, NodeEvent::Record(_)))
        .await
        .unwrap();
    let NodeEvent::Record(record) = event else { unreachable!() };
    assert_eq!(record.index, 0.0);
    assert_eq!(record.particles, 10.0);
    assert_eq!(pair.server.state.lock().queue.len(), 4);

    let csv = std::fs::read_to_string(pair.client.layout.recv_csv()).unwrap();
    assert_eq!(csv.lines().count(), 1);

    pair.stop().await;
}

/// Polling drains the whole queue without further commands.
#[tokio::test]
async fn test_polling_drains_queue() {
    let mut pair = spawn_pair();
    for i in 0..3 {
        pair.server.state.enqueue_status(ProgressRecord {
            index: i as f32,
            ..Default::default()
        });
    }

    pair.client.command(Command::Polling(true)).await;
    for i in 0..3 {
        let want = i as f32;
        pair.client
            .expect("record", |e| matches!(e, NodeEvent::Record(r) if r.index == want))
            .await
            .unwrap();
    }
    assert!(pair.server.state.lock().queue.is_empty());

    pair.stop().await;
}

/// Turning state frames on makes them reach the client; the capture flag
/// accepts force.
#[tokio::test]
async fn test_state_frames_and_capture() {
    let mut pair = spawn_pair();
    pair.server.state.lock().measurements.particles = 300;

    pair.client.command(Command::SetSendStates(true)).await;
    pair.client.expect("ack", ack(Opcode::SetSendStates, TransferCode::Ok)).await.unwrap();
    let event = pair
        .client
        .expect("state frame", |e| matches!(e, NodeEvent::State(_)))
        .await
        .unwrap();
    let NodeEvent::State(frame) = event else { unreachable!() };
    assert_eq!(frame.particles, 255);

    pair.client
        .command(Command::SetCapture(canlink_core::opcode::FORCE_CAPTURE))
        .await;
    pair.client.expect("ack", ack(Opcode::SetAllowCapture, TransferCode::Ok)).await.unwrap();
    assert_eq!(
        pair.server.state.lock().capture,
        canlink_services::state::CaptureMode::Force
    );

    pair.client.command(Command::SetCapture(7)).await;
    pair.client
        .expect("ack", ack(Opcode::SetAllowCapture, TransferCode::Error))
        .await
        .unwrap();

    pair.stop().await;
}
