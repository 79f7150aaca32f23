//! Self-lock (latch) state, one slot per input bit

use crate::core::protocol::frame::IO_BITS;
use serde::{Deserialize, Serialize};

/// Latch memory of one input bit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatchState {
    /// Input level seen in the previous processed frame
    pub prev_input: bool,
    /// Current latched output level
    pub toggled_output: bool,
}

impl LatchState {
    /// Feed the current input level and return the latched output
    ///
    /// The output flips on a 0 → 1 transition. `prev_input` is updated on
    /// every call, edge or not.
    pub fn sample(&mut self, current_input: bool) -> bool {
        if !self.prev_input && current_input {
            self.toggled_output = !self.toggled_output;
        }
        self.prev_input = current_input;
        self.toggled_output
    }
}

/// Latch state of all 192 input bits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatchStates {
    slots: [LatchState; IO_BITS],
}

impl Default for LatchStates {
    fn default() -> Self {
        Self::new()
    }
}

impl LatchStates {
    /// Everything at (0, 0)
    pub fn new() -> Self {
        Self {
            slots: [LatchState::default(); IO_BITS],
        }
    }

    /// State of `input_bit`, `None` when out of range
    pub fn get(&self, input_bit: usize) -> Option<&LatchState> {
        self.slots.get(input_bit)
    }

    /// Sample `input_bit`, see [`LatchState::sample`]
    pub(crate) fn sample(&mut self, input_bit: usize, current_input: bool) -> bool {
        self.slots[input_bit].sample(current_input)
    }

    /// Put `input_bit` back to (0, 0)
    pub fn reset(&mut self, input_bit: usize) {
        if let Some(slot) = self.slots.get_mut(input_bit) {
            *slot = LatchState::default();
        }
    }

    /// Put every bit back to (0, 0)
    pub fn reset_all(&mut self) {
        self.slots = [LatchState::default(); IO_BITS];
    }

    /// Inputs whose latched output is currently 1
    pub fn latched_on(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.toggled_output)
            .map(|(i, _)| i)
    }
}
