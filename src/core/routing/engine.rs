//! Routing engine: one status frame in, one control frame out

use super::latch::LatchStates;
use super::table::{RoutingError, RoutingTable};
use crate::core::protocol::checksum::CrcOrder;
use crate::core::protocol::frame::{
    get_bit, set_bit, FrameError, InboundFrame, OutboundFrame, DATA_BYTES,
};

/// Route one validated frame
///
/// Enabled entries are applied in ascending input order, so when several
/// inputs target the same output the highest input bit wins. Latch state
/// is sampled for every enabled latching entry.
pub fn route_frame(
    frame: &InboundFrame,
    table: &RoutingTable,
    latch: &mut LatchStates,
    order: CrcOrder,
) -> OutboundFrame {
    let data = frame.data();
    let mut output = [0u8; DATA_BYTES];

    for entry in table.active_entries() {
        let input_bit = usize::from(entry.input_bit);
        let current = get_bit(data, input_bit);
        let value = if entry.latch {
            latch.sample(input_bit, current)
        } else {
            current
        };
        set_bit(&mut output, usize::from(entry.output_bit), value);
    }

    OutboundFrame::assemble(&output, order)
}

/// Owns the routing table and latch state and turns frames into responses
#[derive(Debug, Clone, Default)]
pub struct RoutingEngine {
    table: RoutingTable,
    latch: LatchStates,
    order: CrcOrder,
}

impl RoutingEngine {
    /// Create an engine around a table
    pub fn new(table: RoutingTable) -> Self {
        Self {
            table,
            latch: LatchStates::new(),
            order: CrcOrder::default(),
        }
    }

    /// Set the checksum byte order of produced frames
    #[must_use]
    pub fn with_crc_order(mut self, order: CrcOrder) -> Self {
        self.order = order;
        self
    }

    /// Checksum byte order in use
    pub fn crc_order(&self) -> CrcOrder {
        self.order
    }

    /// Current routing table
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Current latch state
    pub fn latch_states(&self) -> &LatchStates {
        &self.latch
    }

    /// Route a validated frame
    pub fn process(&mut self, frame: &InboundFrame) -> OutboundFrame {
        let out = route_frame(frame, &self.table, &mut self.latch, self.order);
        tracing::trace!("Routed {:?} -> {:?}", frame, out);
        out
    }

    /// Validate raw bytes and route them
    ///
    /// Invalid input leaves latch state untouched.
    pub fn process_bytes(&mut self, raw: &[u8]) -> Result<OutboundFrame, FrameError> {
        let frame = InboundFrame::parse(raw.to_vec())?;
        Ok(self.process(&frame))
    }

    /// Replace the whole table
    ///
    /// Bits whose latch mode turns on start from (0, 0).
    pub fn replace_table(&mut self, table: RoutingTable) {
        for bit in table.latches_enabled_since(&self.table) {
            self.latch.reset(usize::from(bit));
        }
        tracing::info!("Routing table replaced ({} enabled)", table.active_count());
        self.table = table;
    }

    /// See [`RoutingTable::set_output`]
    pub fn set_output(&mut self, input_bit: usize, output_bit: usize) -> Result<(), RoutingError> {
        self.table.set_output(input_bit, output_bit)
    }

    /// See [`RoutingTable::set_enabled`]
    pub fn set_enabled(&mut self, input_bit: usize, enabled: bool) -> Result<(), RoutingError> {
        self.table.set_enabled(input_bit, enabled)
    }

    /// Switch latch mode; turning it on resets the bit's latch state
    pub fn set_latch(&mut self, input_bit: usize, latch: bool) -> Result<(), RoutingError> {
        if self.table.set_latch(input_bit, latch)? {
            self.latch.reset(input_bit);
        }
        Ok(())
    }

    /// Reset latch state of every bit
    pub fn reset_latches(&mut self) {
        self.latch.reset_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::frame::{INBOUND_MARKER, IO_BITS};

    fn frame_with(bits: &[usize]) -> InboundFrame {
        let mut data = [0u8; DATA_BYTES];
        for &bit in bits {
            set_bit(&mut data, bit, true);
        }
        InboundFrame::from_data(data)
    }

    #[test]
    fn test_empty_table_gives_zero_frame() {
        let mut engine = RoutingEngine::default();
        let out = engine.process(&frame_with(&[0, 50, 191]));
        assert!(out.data().iter().all(|&b| b == 0));
        assert!(out.verify(CrcOrder::HighFirst).is_ok());
    }

    #[test]
    fn test_remap() {
        let mut engine = RoutingEngine::default();
        engine.set_output(3, 100).unwrap();
        engine.set_enabled(3, true).unwrap();
        let out = engine.process(&frame_with(&[3]));
        assert!(out.output(100));
        assert!(!out.output(3));
    }

    #[test]
    fn test_last_write_wins_in_input_order() {
        let mut engine = RoutingEngine::default();
        for input in [10, 20] {
            engine.set_output(input, 0).unwrap();
            engine.set_enabled(input, true).unwrap();
        }
        // Input 20 is applied after input 10
        assert!(!engine.process(&frame_with(&[10])).output(0));
        assert!(engine.process(&frame_with(&[20])).output(0));
    }

    #[test]
    fn test_latch_mode_reset_on_enable() {
        let mut engine = RoutingEngine::default();
        engine.set_enabled(0, true).unwrap();
        engine.set_latch(0, true).unwrap();
        assert!(engine.process(&frame_with(&[0])).output(0));

        engine.set_latch(0, false).unwrap();
        engine.set_latch(0, true).unwrap();
        assert_eq!(engine.latch_states().get(0).copied(), Some(Default::default()));
    }

    #[test]
    fn test_disabled_latch_is_not_sampled() {
        let mut engine = RoutingEngine::default();
        engine.set_latch(5, true).unwrap();
        engine.process(&frame_with(&[5]));
        assert!(!engine.latch_states().get(5).unwrap().prev_input);
    }

    #[test]
    fn test_invalid_bytes_leave_latch_untouched() {
        let mut engine = RoutingEngine::default();
        for bit in 0..IO_BITS {
            engine.set_enabled(bit, true).unwrap();
            engine.set_latch(bit, true).unwrap();
        }
        let before = engine.latch_states().clone();

        let mut raw = frame_with(&(0..IO_BITS).collect::<Vec<_>>()).as_bytes().to_vec();
        raw[0] = 0x00;
        assert_eq!(engine.process_bytes(&raw), Err(FrameError::InvalidMarker(0x00)));
        raw[0] = INBOUND_MARKER;
        assert_eq!(
            engine.process_bytes(&raw[..24]),
            Err(FrameError::TooShort { len: 24 })
        );
        assert_eq!(engine.latch_states(), &before);
    }

    #[test]
    fn test_replace_table_resets_newly_latched() {
        let mut engine = RoutingEngine::default();
        engine.set_enabled(1, true).unwrap();
        engine.set_latch(1, true).unwrap();
        engine.process(&frame_with(&[1]));

        let mut table = engine.table().clone();
        table.set_enabled(2, true).unwrap();
        table.set_latch(2, true).unwrap();
        engine.replace_table(table);

        // Bit 1 kept its latch, bit 2 starts fresh
        assert!(engine.latch_states().get(1).unwrap().toggled_output);
        assert!(!engine.latch_states().get(2).unwrap().prev_input);
    }
}
