mod support;

use dispenser_core::NodeState;
use dispenser_core::led::{COLOR_FAULT, COLOR_LOOPBACK, COLOR_NEGOTIATING, COLOR_READY, LedPattern};
use dispenser_core::protocol::{Command, DEST_BROADCAST, DEST_COORDINATOR, Packet, PacketType};
use dispenser_core::telemetry::TelemetryEventKind;
use support::{Fixture, deliver, pulse_reset};

#[test]
fn negotiation_answers_polls_then_goes_online() {
    let fixture = Fixture::new(5);
    let mut node = fixture.node();

    assert_eq!(node.step(), NodeState::Negotiating);
    assert_eq!(fixture.color(), COLOR_NEGOTIATING);

    fixture.feed(&[b'?']);
    assert_eq!(node.step(), NodeState::Negotiating);
    assert_eq!(fixture.rig.borrow().tx.as_slice(), &[5]);

    fixture.feed(&[b'?', 0xFF]);
    let state = node.step();

    assert_eq!(state.id().map(|id| id.get()), Some(5));
    assert_eq!(fixture.color(), COLOR_READY);
    assert_eq!(fixture.rig.borrow().tx.as_slice(), &[5, 5]);
}

#[test]
fn unconfigured_id_is_terminal_even_across_resets() {
    for raw in [0, 255] {
        let fixture = Fixture::new(raw);
        let mut node = fixture.node();

        assert_eq!(node.step(), NodeState::ConfigFault);
        assert_eq!(fixture.color(), COLOR_FAULT);

        pulse_reset(&fixture.shared);
        fixture.feed(&[b'?', 0xFF]);
        assert_eq!(node.step(), NodeState::ConfigFault);
        assert!(fixture.rig.borrow().tx.is_empty(), "faulted node must stay silent");
        assert!(node.state().is_terminal());
    }
}

#[test]
fn only_addressed_node_executes_unicast_while_broadcast_reaches_all() {
    let seven = Fixture::new(7);
    let three = Fixture::new(3);
    let mut node_seven = seven.node();
    let mut node_three = three.node();
    seven.bring_online(&mut node_seven);
    three.bring_online(&mut node_three);

    let to_seven = Command::DispenseTicks(100).to_packet(7);
    let to_three = Command::SetMotorSpeed(40).to_packet(3);
    for fixture in [&seven, &three] {
        fixture.send(&to_seven);
        fixture.send(&to_three);
    }
    for _ in 0..2 {
        node_seven.step();
        node_three.step();
    }

    assert!(seven.shared.is_dispensing());
    assert_eq!(seven.speed(), u8::MAX);
    assert!(!three.shared.is_dispensing());
    assert_eq!(three.speed(), 40);

    let broadcast = Command::LedIdle.to_packet(DEST_BROADCAST);
    deliver(&seven, &mut node_seven, &broadcast);
    deliver(&three, &mut node_three, &broadcast);

    assert_eq!(seven.shared.led_pattern(), LedPattern::Idle);
    assert_eq!(three.shared.led_pattern(), LedPattern::Idle);
}

#[test]
fn tick_dispense_completes_on_target_edge_and_reports_idle() {
    let fixture = Fixture::new(7);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);

    deliver(&fixture, &mut node, &Command::DispenseTicks(100).to_packet(7));
    fixture.pump_edges(99);
    assert_eq!(fixture.speed(), u8::MAX);

    fixture.pump_edges(1);
    assert_eq!(fixture.speed(), 0);
    assert!(!fixture.shared.is_dispensing());

    deliver(&fixture, &mut node, &Command::QueryIsDispensing.to_packet(7));
    let replies = fixture.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].dest, DEST_COORDINATOR);
    assert_eq!(replies[0].packet_type(), Some(PacketType::IsDispensing));
    assert_eq!(replies[0].u8_arg(), 0);
    assert!(node.telemetry().contains(TelemetryEventKind::DispenseComplete));
}

#[test]
fn second_dispense_keeps_original_target() {
    let fixture = Fixture::new(2);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);

    deliver(&fixture, &mut node, &Command::DispenseTicks(50).to_packet(2));
    deliver(&fixture, &mut node, &Command::DispenseTicks(500).to_packet(2));

    assert_eq!(fixture.shared.dispense_target(), 50);
    assert!(node.telemetry().contains(TelemetryEventKind::DispenseRejected));
}

#[test]
fn current_trip_suppresses_motor_and_led_commands_until_reset() {
    let fixture = Fixture::new(4);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);
    deliver(&fixture, &mut node, &Command::SetCurrentThreshold(300).to_packet(4));
    deliver(&fixture, &mut node, &Command::DispenseTicks(1_000).to_packet(4));

    for _ in 0..3 {
        fixture.sample_current(300);
    }

    assert!(fixture.shared.fault_latched());
    assert!(!fixture.shared.is_dispensing());
    assert_eq!(fixture.speed(), 0);
    assert_eq!(fixture.shared.led_pattern(), LedPattern::CurrentSense);

    deliver(&fixture, &mut node, &Command::SetMotorSpeed(200).to_packet(4));
    deliver(&fixture, &mut node, &Command::DispenseTicks(10).to_packet(4));
    deliver(&fixture, &mut node, &Command::DispenseTimed(100).to_packet(4));
    deliver(&fixture, &mut node, &Command::LedIdle.to_packet(4));
    assert_eq!(fixture.speed(), 0);
    assert!(!fixture.shared.is_dispensing());
    assert_eq!(fixture.shared.led_pattern(), LedPattern::CurrentSense);
    assert!(node.telemetry().contains(TelemetryEventKind::CurrentSenseTrip));
    assert_eq!(node.telemetry().count(TelemetryEventKind::CommandSuppressed), 4);

    deliver(&fixture, &mut node, &Command::QueryIsDispensing.to_packet(4));
    assert_eq!(fixture.replies().len(), 1, "queries are still answered");

    pulse_reset(&fixture.shared);
    assert_eq!(node.step(), NodeState::Negotiating);
    assert!(!fixture.shared.fault_latched());
    assert_eq!(fixture.shared.over_count(), 0);

    fixture.feed(&[0xFF]);
    node.step();
    deliver(&fixture, &mut node, &Command::SetMotorSpeed(200).to_packet(4));
    assert_eq!(fixture.speed(), 200);
}

#[test]
fn over_threshold_count_accumulates_across_dispenses() {
    let fixture = Fixture::new(6);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);
    let threshold = fixture.shared.current_threshold();

    deliver(&fixture, &mut node, &Command::DispenseTicks(10).to_packet(6));
    fixture.sample_current(threshold);
    fixture.sample_current(threshold + 50);
    fixture.pump_edges(10);
    assert!(!fixture.shared.is_dispensing());
    assert_eq!(fixture.shared.over_count(), 2);

    deliver(&fixture, &mut node, &Command::DispenseTicks(10).to_packet(6));
    fixture.sample_current(threshold);

    assert!(fixture.shared.fault_latched());
    assert_eq!(fixture.speed(), 0);
}

#[test]
fn timed_dispense_runs_for_duration() {
    let fixture = Fixture::new(8);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);

    deliver(&fixture, &mut node, &Command::DispenseTimed(250).to_packet(8));

    assert_eq!(fixture.rig.borrow().slept_ms, 250);
    assert_eq!(fixture.speed(), 0);
    assert!(node.telemetry().contains(TelemetryEventKind::TimedDispenseComplete));
}

#[test]
fn timed_dispense_is_cancelled_by_bus_reset() {
    let fixture = Fixture::new(8);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);
    fixture.rig.borrow_mut().reset_at_ms = Some(40);

    deliver(&fixture, &mut node, &Command::DispenseTimed(5_000).to_packet(8));

    assert!(fixture.rig.borrow().slept_ms < 5_000);
    assert_eq!(fixture.speed(), 0);
    let last = node.telemetry().latest().expect("timed dispense recorded");
    assert_eq!(last.event, TelemetryEventKind::TimedDispenseCancelled);

    assert_eq!(node.step(), NodeState::Negotiating);
}

#[test]
fn bus_reset_aborts_tick_dispense() {
    let fixture = Fixture::new(12);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);

    deliver(&fixture, &mut node, &Command::DispenseTicks(1_000).to_packet(12));
    fixture.pump_edges(25);
    assert!(fixture.shared.is_dispensing());
    assert_eq!(fixture.speed(), u8::MAX);
    let stops_before = fixture.rig.borrow().sense_stops;

    pulse_reset(&fixture.shared);
    assert_eq!(node.step(), NodeState::Negotiating);

    assert!(!fixture.shared.is_dispensing());
    assert_eq!(fixture.speed(), 0);
    assert!(fixture.rig.borrow().sense_stops > stops_before);
    assert!(node.telemetry().contains(TelemetryEventKind::BusReset));

    fixture.pump_edges(1_000);
    assert_eq!(fixture.speed(), 0);
}

#[test]
fn id_conflict_waits_for_reset() {
    let fixture = Fixture::new(9);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);

    assert_eq!(
        deliver(&fixture, &mut node, &Command::IdConflict.to_packet(9)),
        NodeState::IdConflict
    );
    assert_eq!(fixture.color(), COLOR_FAULT);

    deliver(&fixture, &mut node, &Command::SetMotorSpeed(90).to_packet(9));
    assert_eq!(node.step(), NodeState::IdConflict);
    assert_eq!(fixture.speed(), 0);

    pulse_reset(&fixture.shared);
    assert_eq!(node.step(), NodeState::Negotiating);
}

#[test]
fn loopback_echoes_until_reset() {
    let fixture = Fixture::new(11);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);

    assert_eq!(
        deliver(&fixture, &mut node, &Command::CommTest.to_packet(11)),
        NodeState::Loopback
    );
    assert_eq!(fixture.color(), COLOR_LOOPBACK);

    fixture.feed(b"abc");
    node.step();
    assert_eq!(fixture.rig.borrow().tx.as_slice(), b"abc");

    fixture.rig.borrow_mut().tx_blocked = true;
    fixture.feed(b"z");
    pulse_reset(&fixture.shared);
    assert_eq!(node.step(), NodeState::Negotiating);
}

#[test]
fn liquid_level_is_cached_until_refreshed() {
    let fixture = Fixture::new(12);
    fixture.rig.borrow_mut().level = 610;
    let mut node = fixture.node();
    node.boot();
    fixture.bring_online(&mut node);

    fixture.rig.borrow_mut().level = 200;
    deliver(&fixture, &mut node, &Command::QueryLiquidLevel.to_packet(12));
    assert_eq!(fixture.replies()[0].u16_arg(), 610);

    deliver(&fixture, &mut node, &Command::RefreshLiquidLevel.to_packet(12));
    deliver(&fixture, &mut node, &Command::QueryLiquidLevel.to_packet(12));
    assert_eq!(fixture.replies()[0].u16_arg(), 200);

    deliver(&fixture, &mut node, &Command::DispenseTicks(30).to_packet(12));
    fixture.rig.borrow_mut().level = 50;
    deliver(&fixture, &mut node, &Command::RefreshLiquidLevel.to_packet(12));
    assert_eq!(node.liquid_level(), 200);
    assert!(node.telemetry().contains(TelemetryEventKind::LiquidLevelRefused));
}

#[test]
fn saved_tick_total_is_flushed_when_idle_and_reported() {
    let fixture = Fixture::new(13);
    fixture.rig.borrow_mut().tick_total = 10_000;
    let mut node = fixture.node();
    fixture.bring_online(&mut node);

    deliver(&fixture, &mut node, &Command::DispenseTicks(1_500).to_packet(13));
    fixture.pump_edges(1_500);
    assert_eq!(fixture.rig.borrow().tick_writes, 0);

    node.step();
    assert_eq!(fixture.rig.borrow().tick_total, 11_500);
    assert_eq!(fixture.shared.ticks(), 0);

    fixture.pump_edges(20);
    deliver(&fixture, &mut node, &Command::QuerySavedTicks.to_packet(13));
    let reply = fixture.replies()[0];
    assert_eq!(reply.packet_type(), Some(PacketType::SavedTickCount));
    assert_eq!(reply.u32_arg(), 11_520);

    deliver(&fixture, &mut node, &Command::ResetSavedTicks.to_packet(13));
    assert_eq!(fixture.rig.borrow().tick_total, 0);
    assert_eq!(fixture.shared.ticks(), 0);
}

#[test]
fn corrupted_frames_are_skipped() {
    let fixture = Fixture::new(14);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);

    let mut frame = Command::SetMotorSpeed(99).to_packet(14).encode();
    frame[2] ^= 0x01;
    fixture.feed(&frame);
    node.step();
    assert_eq!(fixture.speed(), 0);
    assert!(node.telemetry().contains(TelemetryEventKind::CrcFailure));

    let ping = Packet::new(14, PacketType::Ping, [0; 4]);
    deliver(&fixture, &mut node, &ping);
    deliver(&fixture, &mut node, &Command::SetMotorSpeed(99).to_packet(14));
    assert_eq!(fixture.speed(), 99);
    assert!(fixture.replies().is_empty());
}

#[test]
fn led_frames_follow_the_sync_line() {
    let fixture = Fixture::new(15);
    let mut node = fixture.node();
    fixture.bring_online(&mut node);
    deliver(&fixture, &mut node, &Command::LedDispense.to_packet(15));
    let divisor = LedPattern::Dispense.default_divisor();

    let mut level = false;
    for _ in 0..divisor - 1 {
        level = !level;
        fixture.shared.on_sync_edge(level);
    }
    node.step();
    assert_eq!(fixture.shared.led_frame_counter(), 0);

    fixture.shared.on_sync_edge(!level);
    node.step();
    assert_eq!(fixture.shared.led_frame_counter(), 1);
    assert_eq!(fixture.color(), LedPattern::Dispense.color_at(0));
}
