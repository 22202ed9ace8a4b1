pub mod simulated;

pub use simulated::{CloseReason, ClosedDeal, SimulatedTerminal, SimulatedTerminalConfig};
