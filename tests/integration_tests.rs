//! Integration tests for complete transfers against the simulated vehicle.
//!
//! The failure tables run every vehicle failure mode twice: once failing on
//! every attempt and once failing only the first time.

use missionlink_core::sim::spawn_vehicle;
use missionlink_core::{
    ChannelObserver, EngineHandle, ErrorCode, FailureMode, LinkModel, Loopback, Message,
    MissionItemSet, MissionResult, SimVehicle, Step, TransferConfig, TransferError,
    TransferEvent, TransferKind, TransferState,
};
use missionlink_integration_tests::{
    TABLE_ITEM_COUNT, fast_config, loopback_after_upload, loopback_with, test_mission,
};
use std::time::Duration;
use tokio::sync::mpsc;

/// Expected outcome of a failure mode
fn expected_outcome(mode: FailureMode, fail_first_time_only: bool) -> Option<ErrorCode> {
    if mode == FailureMode::None || (fail_first_time_only && mode.is_no_response()) {
        return None;
    }
    let code = match mode {
        FailureMode::None => unreachable!(),
        FailureMode::ReadRequestListNoResponse
        | FailureMode::ReadRequest0NoResponse
        | FailureMode::ReadRequest1NoResponse
        | FailureMode::WriteRequest0NoResponse
        | FailureMode::WriteRequest1NoResponse
        | FailureMode::WriteFinalAckNoResponse => ErrorCode::AckTimeout,
        FailureMode::ReadRequest0IncorrectSequence
        | FailureMode::ReadRequest1IncorrectSequence
        | FailureMode::WriteRequest0IncorrectSequence
        | FailureMode::WriteRequest1IncorrectSequence => ErrorCode::ItemMismatch,
        FailureMode::ReadRequest0ErrorAck
        | FailureMode::ReadRequest1ErrorAck
        | FailureMode::WriteRequest0ErrorAck
        | FailureMode::WriteRequest1ErrorAck
        | FailureMode::WriteFinalAckErrorAck => ErrorCode::Vehicle,
        FailureMode::WriteFinalAckMissingRequests => ErrorCode::MissingRequests,
    };
    Some(code)
}

/// Check the notifications of one finished transfer
fn assert_single_outcome(loopback: &Loopback, kind: TransferKind, expected: Option<ErrorCode>) {
    let log = loopback.engine.observer();
    let terminal: Vec<&TransferEvent> = log.events().iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminal.len(), 1, "exactly one terminal notification");

    match expected {
        None => {
            assert_eq!(log.completions(), 1);
            assert!(log.errors().is_empty(), "unexpected errors {:?}", log.errors());
        }
        Some(code) => {
            assert_eq!(log.completions(), 0);
            assert_eq!(log.errors(), vec![code]);
        }
    }
    assert_eq!(
        log.state_changes(),
        vec![
            (TransferState::Idle, kind.state()),
            (kind.state(), TransferState::Idle),
        ]
    );
    assert!(loopback.engine.can_edit());
    assert!(loopback.engine.armed_timer().is_none());
}

// ============================================================================
// Failure Tables
// ============================================================================

fn run_write_case(mode: FailureMode, fail_first_time_only: bool) {
    let previous = test_mission(3);
    let mut loopback = loopback_after_upload(&previous);
    loopback.vehicle.set_failure_mode(mode, fail_first_time_only);

    let items = test_mission(TABLE_ITEM_COUNT);
    loopback.engine.begin_write(items.clone()).unwrap();
    assert_eq!(loopback.engine.state(), TransferState::WriteInProgress);
    assert!(!loopback.engine.can_edit());
    loopback.run();

    let expected = expected_outcome(mode, fail_first_time_only);
    assert_single_outcome(&loopback, TransferKind::Write, expected);
    if expected.is_none() {
        assert_eq!(loopback.engine.mission_items(), &items);
        assert_eq!(loopback.vehicle.mission(), &items);
    } else {
        assert_eq!(loopback.engine.mission_items(), &previous, "{mode} changed the mission");
    }
}

fn run_read_case(mode: FailureMode, fail_first_time_only: bool) {
    let mut loopback = loopback_with(mode, fail_first_time_only, TABLE_ITEM_COUNT);

    loopback.engine.begin_read().unwrap();
    assert_eq!(loopback.engine.state(), TransferState::ReadInProgress);
    loopback.run();

    let expected = expected_outcome(mode, fail_first_time_only);
    assert_single_outcome(&loopback, TransferKind::Read, expected);
    if expected.is_none() {
        assert_eq!(loopback.engine.mission_items(), &test_mission(TABLE_ITEM_COUNT));
    } else {
        assert!(loopback.engine.mission_items().is_empty(), "{mode} committed items");
    }
}

#[test]
fn test_write_failure_handling() {
    for mode in FailureMode::ALL
        .into_iter()
        .filter(|m| m.is_write() || *m == FailureMode::None)
    {
        run_write_case(mode, false);
        run_write_case(mode, true);
    }
}

#[test]
fn test_read_failure_handling() {
    for mode in FailureMode::ALL
        .into_iter()
        .filter(|m| m.is_read() || *m == FailureMode::None)
    {
        run_read_case(mode, false);
        run_read_case(mode, true);
    }
}

// ============================================================================
// Transfer Properties
// ============================================================================

#[test]
fn test_roundtrip_preserves_items() {
    for count in [0, 1, 2, 8, 100] {
        let items = test_mission(count);
        let mut loopback = loopback_after_upload(&items);

        // Read into a fresh engine so the result is not the uploaded copy.
        let vehicle = std::mem::take(&mut loopback.vehicle);
        let mut reader = Loopback::new(fast_config(), vehicle).unwrap();
        reader.engine.begin_read().unwrap();
        reader.run();

        assert_eq!(reader.engine.mission_items(), &items, "round trip of {count} items");
        assert_eq!(reader.engine.observer().completions(), 1);
    }
}

#[test]
fn test_second_transfer_rejected() {
    let mut loopback = loopback_with(FailureMode::None, false, 4);
    loopback.engine.begin_read().unwrap();
    let events_before = loopback.engine.observer().events().len();
    let timer_before = loopback.engine.armed_timer();

    for result in [
        loopback.engine.begin_read(),
        loopback.engine.begin_write(test_mission(2)),
    ] {
        assert_eq!(
            result,
            Err(TransferError::InvalidState(TransferState::ReadInProgress))
        );
    }
    assert_eq!(loopback.engine.state(), TransferState::ReadInProgress);
    assert_eq!(loopback.engine.observer().events().len(), events_before);
    assert_eq!(loopback.engine.armed_timer(), timer_before);
    assert_eq!(loopback.engine.channel().len(), 1);

    loopback.run();
    assert_eq!(loopback.engine.observer().completions(), 1);
}

#[test]
fn test_timeout_exhaustion_attempt_count() {
    for max_retries in [0, 1, 3] {
        let config = fast_config().with_max_retries(max_retries);
        let mut vehicle = SimVehicle::new();
        vehicle.set_failure_mode(FailureMode::ReadRequestListNoResponse, false);
        let mut loopback = Loopback::new(config, vehicle).unwrap();

        loopback.engine.begin_read().unwrap();
        let timeouts = loopback.run();

        let attempts = loopback
            .vehicle
            .count_received(|m| *m == Message::RequestList);
        assert_eq!(attempts, max_retries as usize + 1);
        assert_eq!(timeouts, attempts);
        assert_eq!(loopback.engine.state(), TransferState::Idle);
        assert_eq!(loopback.engine.observer().errors(), vec![ErrorCode::AckTimeout]);
    }
}

#[test]
fn test_retry_resends_only_current_step() {
    let mut loopback = loopback_with(FailureMode::WriteRequest1NoResponse, false, 0);
    let items = test_mission(4);
    loopback.engine.begin_write(items.clone()).unwrap();
    loopback.run();

    let announces = loopback
        .vehicle
        .count_received(|m| matches!(m, Message::AnnounceCount { .. }));
    let item0 = loopback
        .vehicle
        .count_received(|m| matches!(m, Message::ItemPayload(item) if item.seq == 0));
    assert_eq!(announces, 1);
    assert_eq!(item0, 2);

    match &loopback.engine.observer().events().last() {
        Some(TransferEvent::Failed { code, detail, .. }) => {
            assert_eq!(*code, ErrorCode::AckTimeout);
            assert!(detail.contains("item 0"), "{detail}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn test_sequence_mismatch_not_retried() {
    for mode in [
        FailureMode::WriteRequest0IncorrectSequence,
        FailureMode::WriteRequest1IncorrectSequence,
    ] {
        let mut loopback = loopback_with(mode, false, 0);
        loopback.engine.begin_write(test_mission(4)).unwrap();
        let timeouts = loopback.run();

        assert_eq!(timeouts, 0, "{mode} retried");
        assert_eq!(loopback.engine.observer().errors(), vec![ErrorCode::ItemMismatch]);
    }

    for mode in [
        FailureMode::ReadRequest0IncorrectSequence,
        FailureMode::ReadRequest1IncorrectSequence,
    ] {
        let mut loopback = loopback_with(mode, false, 4);
        loopback.engine.begin_read().unwrap();
        assert_eq!(loopback.run(), 0, "{mode} retried");
        assert_eq!(loopback.engine.observer().errors(), vec![ErrorCode::ItemMismatch]);
        assert_eq!(
            loopback
                .vehicle
                .count_received(|m| matches!(m, Message::RequestItem { .. })),
            if mode == FailureMode::ReadRequest0IncorrectSequence { 1 } else { 2 }
        );
    }
}

#[test]
fn test_write_error_ack_on_item_one() {
    let previous = test_mission(2);
    let mut loopback = loopback_after_upload(&previous);
    loopback
        .vehicle
        .set_failure_mode(FailureMode::WriteRequest1ErrorAck, false);

    loopback.engine.begin_write(test_mission(8)).unwrap();
    loopback.run();

    assert_eq!(loopback.engine.observer().errors(), vec![ErrorCode::Vehicle]);
    assert_eq!(loopback.engine.mission_items(), &previous);
    assert!(loopback.engine.can_edit());
}

#[test]
fn test_read_request_list_recovers_after_one_timeout() {
    let mut loopback = loopback_with(FailureMode::ReadRequestListNoResponse, true, 8);
    loopback.engine.begin_read().unwrap();

    assert_eq!(loopback.run(), 1);
    assert_eq!(loopback.engine.mission_items(), &test_mission(8));
    assert_eq!(loopback.engine.observer().completions(), 1);
    assert!(loopback.engine.observer().errors().is_empty());
}

#[test]
fn test_missing_requests_reports_counts() {
    let mut loopback = loopback_with(FailureMode::WriteFinalAckMissingRequests, false, 0);
    loopback.engine.begin_write(test_mission(5)).unwrap();
    loopback.run();

    match loopback.engine.observer().events().last() {
        Some(TransferEvent::Failed { code, detail, .. }) => {
            assert_eq!(*code, ErrorCode::MissingRequests);
            assert!(detail.contains("1 of 5"), "{detail}");
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

// ============================================================================
// Out-of-band Messages
// ============================================================================

#[test]
fn test_unexpected_messages_while_idle() {
    let items = test_mission(3);
    let mut loopback = loopback_after_upload(&items);

    for message in [
        SimVehicle::unexpected_final_ack(MissionResult::Accepted),
        SimVehicle::unexpected_final_ack(MissionResult::Denied),
        SimVehicle::unexpected_item(),
        SimVehicle::unexpected_request(),
        Message::CountResponse { count: 9 },
        Message::ErrorAck {
            reason: MissionResult::Error,
        },
    ] {
        loopback.engine.handle_message(message);
        assert_eq!(loopback.engine.state(), TransferState::Idle);
    }

    assert!(loopback.engine.observer().events().is_empty());
    assert!(loopback.engine.channel().is_empty());
    assert_eq!(loopback.engine.mission_items(), &items);
}

#[test]
fn test_foreign_messages_during_transfer_ignored() {
    let mut loopback = loopback_with(FailureMode::None, false, 3);
    loopback.engine.begin_read().unwrap();
    let timer = loopback.engine.armed_timer();

    loopback.engine.handle_message(Message::RequestItem { seq: 0 });
    loopback.engine.handle_message(Message::FinalAck {
        result: MissionResult::Accepted,
    });
    assert_eq!(loopback.engine.state(), TransferState::ReadInProgress);
    assert_eq!(loopback.engine.armed_timer(), timer);

    loopback.run();
    assert_eq!(loopback.engine.mission_items(), &test_mission(3));
}

#[test]
fn test_stale_timer_after_step_change() {
    let mut loopback = loopback_with(FailureMode::None, false, 3);
    loopback.engine.begin_read().unwrap();
    let stale = loopback.engine.armed_timer().unwrap();

    loopback.engine.handle_message(Message::CountResponse { count: 3 });
    let progress = loopback.engine.progress().unwrap();
    assert_eq!(progress.step, Step::RequestItem(0));

    loopback.engine.handle_timeout(stale.id);
    assert_eq!(loopback.engine.progress().unwrap().attempts, 1);
    assert_eq!(loopback.engine.channel().len(), 2);
}

// ============================================================================
// Async Driver
// ============================================================================

async fn next_terminal(events: &mut mpsc::UnboundedReceiver<TransferEvent>) -> TransferEvent {
    loop {
        let event = events.recv().await.expect("observer channel open");
        if event.is_terminal() {
            return event;
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_driver_roundtrip_over_lossy_link() {
    let (to_vehicle, from_engine) = mpsc::unbounded_channel();
    let (to_engine, inbound) = mpsc::channel(64);
    let (observer, mut events) = ChannelObserver::new();
    let config = TransferConfig::default()
        .with_ack_timeout(Duration::from_millis(100))
        .with_max_retries(10);
    let link = LinkModel::lossy(0.1, 42).with_latency(Duration::from_millis(5));

    let handle = EngineHandle::spawn(config, to_vehicle, inbound, observer).unwrap();
    let vehicle = spawn_vehicle(SimVehicle::new(), link, from_engine, to_engine);
    let items = test_mission(12);

    handle.begin_write(items.clone()).await.unwrap();
    assert!(matches!(
        next_terminal(&mut events).await,
        TransferEvent::Completed {
            kind: TransferKind::Write,
            item_count: 12
        }
    ));

    handle.begin_read().await.unwrap();
    assert!(matches!(
        next_terminal(&mut events).await,
        TransferEvent::Completed {
            kind: TransferKind::Read,
            item_count: 12
        }
    ));

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.mission, items);

    handle.shutdown().await.unwrap();
    let vehicle = vehicle.await.unwrap();
    assert_eq!(vehicle.mission(), &items);
}

#[tokio::test(start_paused = true)]
async fn test_driver_link_loss_mid_transfer() {
    let (to_vehicle, mut from_engine) = mpsc::unbounded_channel();
    let (to_engine, inbound) = mpsc::channel(4);
    let (observer, mut events) = ChannelObserver::new();
    let handle = EngineHandle::spawn(fast_config(), to_vehicle, inbound, observer).unwrap();

    handle.begin_write(test_mission(3)).await.unwrap();
    assert_eq!(
        from_engine.recv().await,
        Some(Message::AnnounceCount { count: 3 })
    );
    to_engine.send(Message::RequestItem { seq: 0 }).await.unwrap();
    drop(to_engine);

    match next_terminal(&mut events).await {
        TransferEvent::Failed {
            kind,
            code,
            detail,
            transient,
        } => {
            assert_eq!(kind, TransferKind::Write);
            assert_eq!(code, ErrorCode::AckTimeout);
            assert!(detail.contains("lost"), "{detail}");
            assert!(transient);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert!(handle.snapshot().await.unwrap().can_edit());
    assert_eq!(
        handle.snapshot().await.unwrap().mission,
        MissionItemSet::new()
    );
}

#[tokio::test(start_paused = true)]
async fn test_driver_refuses_transfers_after_link_loss() {
    let (to_vehicle, mut from_engine) = mpsc::unbounded_channel();
    let (to_engine, inbound) = mpsc::channel(4);
    let (observer, mut events) = ChannelObserver::new();
    let handle = EngineHandle::spawn(fast_config(), to_vehicle, inbound, observer).unwrap();

    drop(to_engine);
    // Paused time only advances once the engine task has seen the close.
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert_eq!(
        handle.begin_read().await,
        Err(TransferError::LinkLost {
            step: Step::RequestList
        })
    );
    assert_eq!(
        handle.begin_write(test_mission(2)).await,
        Err(TransferError::LinkLost {
            step: Step::AnnounceCount
        })
    );

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.state, TransferState::Idle);
    assert!(snapshot.progress.is_none());
    assert!(from_engine.try_recv().is_err());
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_driver_rejects_zero_timeout() {
    let (to_vehicle, _from_engine) = mpsc::unbounded_channel();
    let (_to_engine, inbound) = mpsc::channel(4);
    let (observer, _events) = ChannelObserver::new();
    let config = TransferConfig::default().with_ack_timeout(Duration::ZERO);

    let result = EngineHandle::spawn(config, to_vehicle, inbound, observer);
    assert!(matches!(result, Err(TransferError::InvalidConfig(_))));
}
