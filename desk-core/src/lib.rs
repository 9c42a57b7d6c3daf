#![no_std]

#[cfg(test)]
extern crate std;

// Shared logic for the remotely actuated desk.
//
// Everything here is transport-agnostic: the actuator, the display and the
// rewards platform are reached through the traits in `link`, `reconcile`,
// `catalog` and `control`, so the same engine runs against real radios or the
// host emulator.

pub mod catalog;
pub mod codec;
pub mod config;
pub mod control;
pub mod events;
pub mod link;
pub mod reconcile;
pub mod tracker;
