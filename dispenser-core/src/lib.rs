#![no_std]

// Shared control logic for a single dispenser node on the pump bus.
//
// Everything here is portable between the MCU firmware and the host emulator:
// peripherals are reached through the collaborator traits in [`hal`], and all
// state touched from interrupt context lives in [`shared::SharedState`].

pub mod address;
pub mod config;
pub mod current;
pub mod dispatch;
pub mod dispense;
pub mod flow;
pub mod hal;
pub mod led;
pub mod level;
pub mod protocol;
pub mod reset;
pub mod shared;
pub mod telemetry;
pub mod ticks;

pub use address::NodeId;
pub use config::NodeConfig;
pub use dispatch::{Board, Node, NodeState, Peripherals};
pub use shared::SharedState;
