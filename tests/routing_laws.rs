//! End-to-end routing behavior through the public API

use iorelay_core::core::protocol::frame::{DATA_BYTES, INBOUND_MARKER, IO_BITS, OUTBOUND_LEN};
use iorelay_core::core::protocol::{crc16, verify_crc16, CrcOrder, FrameError, InboundFrame};
use iorelay_core::core::routing::{RoutingEngine, RoutingTable};

fn status_with(bits: &[usize]) -> Vec<u8> {
    let mut raw = vec![0u8; 1 + DATA_BYTES];
    raw[0] = INBOUND_MARKER;
    for &bit in bits {
        raw[1 + bit / 8] |= 0x80 >> (bit % 8);
    }
    raw
}

fn all_enabled() -> RoutingTable {
    let mut table = RoutingTable::new();
    for bit in 0..IO_BITS {
        table.set_enabled(bit, true).unwrap();
    }
    table
}

#[test]
fn test_reference_bytes_for_empty_table() {
    let mut engine = RoutingEngine::default();
    let out = engine.process_bytes(&status_with(&[0, 5, 100])).unwrap();

    let mut expected = vec![0xA5];
    expected.extend_from_slice(&[0u8; DATA_BYTES]);
    expected.extend_from_slice(&[0x01, 0x25, 0x3F]);
    assert_eq!(out.as_ref(), expected.as_slice());
    assert_eq!(crc16(&expected[..OUTBOUND_LEN - 2]), 0x253F);
}

#[test]
fn test_reference_bytes_for_single_route() {
    let mut table = RoutingTable::new();
    table.set_enabled(0, true).unwrap();
    table.set_output(0, 9).unwrap();
    let mut engine = RoutingEngine::new(table);

    let out = engine.process_bytes(&status_with(&[0])).unwrap();
    let bytes = out.as_ref();
    assert_eq!(bytes[0], 0xA5);
    assert_eq!(bytes[1], 0x00);
    assert_eq!(bytes[2], 0x40);
    assert_eq!(&bytes[25..], &[0x01, 0xF2, 0x0D]);
}

#[test]
fn test_reference_bytes_for_straight_through_bit_zero() {
    let mut table = RoutingTable::new();
    table.set_enabled(0, true).unwrap();
    let mut engine = RoutingEngine::new(table);

    let out = engine.process_bytes(&status_with(&[0])).unwrap();
    let mut expected = vec![0xA5, 0x80];
    expected.extend_from_slice(&[0u8; DATA_BYTES - 1]);
    expected.extend_from_slice(&[0x01, 0xCF, 0x90]);
    assert_eq!(out.as_ref(), expected.as_slice());
}

#[test]
fn test_identity_for_every_bit() {
    let mut engine = RoutingEngine::new(all_enabled());
    for bit in 0..IO_BITS {
        let out = engine.process_bytes(&status_with(&[bit])).unwrap();
        for other in 0..IO_BITS {
            assert_eq!(out.output(other), other == bit, "input {bit}, output {other}");
        }
        assert!(verify_crc16(out.as_ref(), CrcOrder::HighFirst));
    }
}

#[test]
fn test_all_inputs_high_pass_through() {
    let mut engine = RoutingEngine::new(all_enabled());
    let mut raw = vec![0xFFu8; 1 + DATA_BYTES];
    raw[0] = INBOUND_MARKER;
    let out = engine.process_bytes(&raw).unwrap();
    assert!(out.data().iter().all(|&b| b == 0xFF));
}

#[test]
fn test_disabled_bits_never_drive_outputs() {
    let mut table = all_enabled();
    table.set_enabled(42, false).unwrap();
    let mut engine = RoutingEngine::new(table);

    let out = engine.process_bytes(&status_with(&[42])).unwrap();
    assert!(out.data().iter().all(|&b| b == 0));
}

#[test]
fn test_disabling_a_live_bit_clears_only_that_output() {
    let mut engine = RoutingEngine::new(all_enabled());
    let raw = status_with(&[42, 43, 120]);

    let before = engine.process_bytes(&raw).unwrap();
    assert!(before.output(42) && before.output(43) && before.output(120));

    engine.set_enabled(42, false).unwrap();
    let after = engine.process_bytes(&raw).unwrap();
    assert!(!after.output(42));
    assert!(after.output(43));
    assert!(after.output(120));
}

#[test]
fn test_latch_toggles_on_rising_edges() {
    let mut table = RoutingTable::new();
    table.set_enabled(17, true).unwrap();
    table.set_latch(17, true).unwrap();
    let mut engine = RoutingEngine::new(table);

    let outputs: Vec<bool> = [false, true, false, true, true, false, true]
        .iter()
        .map(|&high| {
            let bits: &[usize] = if high { &[17] } else { &[] };
            engine.process_bytes(&status_with(bits)).unwrap().output(17)
        })
        .collect();
    assert_eq!(outputs, vec![false, true, true, false, false, false, true]);
}

#[test]
fn test_last_enabled_input_wins_shared_output() {
    let mut table = RoutingTable::new();
    for input in [3, 40, 150] {
        table.set_enabled(input, true).unwrap();
        table.set_output(input, 7).unwrap();
    }
    let mut engine = RoutingEngine::new(table);

    assert!(engine.process_bytes(&status_with(&[150])).unwrap().output(7));
    assert!(!engine.process_bytes(&status_with(&[3, 40])).unwrap().output(7));
    assert!(engine.process_bytes(&status_with(&[150, 3])).unwrap().output(7));
}

#[test]
fn test_invalid_frames_leave_latch_untouched() {
    let mut table = RoutingTable::new();
    table.set_enabled(0, true).unwrap();
    table.set_latch(0, true).unwrap();
    let mut engine = RoutingEngine::new(table);

    let mut wrong_marker = status_with(&[0]);
    wrong_marker[0] = 0xA5;
    assert_eq!(
        engine.process_bytes(&wrong_marker),
        Err(FrameError::InvalidMarker(0xA5))
    );
    assert_eq!(
        engine.process_bytes(&status_with(&[0])[..10]),
        Err(FrameError::TooShort { len: 10 })
    );
    assert!(engine.latch_states().latched_on().next().is_none());

    assert!(engine.process_bytes(&status_with(&[0])).unwrap().output(0));
}

#[test]
fn test_longer_frames_use_first_data_bytes() {
    let mut raw = status_with(&[191]);
    raw.extend_from_slice(&[0xFF; 8]);
    let frame = InboundFrame::parse(raw).unwrap();
    let mut engine = RoutingEngine::new(all_enabled());
    let out = engine.process(&frame);
    assert!(out.output(191));
    assert!(!out.output(190));
}

#[test]
fn test_saved_table_routes_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("routing.json");

    let mut table = RoutingTable::new();
    table.set_enabled(10, true).unwrap();
    table.set_output(10, 180).unwrap();
    table.set_latch(10, true).unwrap();
    table.save(&path).unwrap();

    let loaded = RoutingTable::load(&path).unwrap();
    assert_eq!(loaded, table);

    let mut a = RoutingEngine::new(table);
    let mut b = RoutingEngine::new(loaded);
    for bits in [&[10usize][..], &[], &[10], &[10, 11]] {
        let raw = status_with(bits);
        assert_eq!(a.process_bytes(&raw), b.process_bytes(&raw));
    }
}
