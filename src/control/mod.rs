//! User control: the command vocabulary and the mode state machine.
//!
//! `ModeController` owns the source selector, the speech sink, the display and
//! the description service. Exactly one operating mode is active at a time and
//! each iteration is cooperative: acquire one frame, do the mode's work, then
//! check the command channel before the next iteration.
//!
//! Mode switches that arrive while a description is in flight are deferred
//! until that iteration finishes. A quit is honored immediately; the in-flight
//! request is abandoned and completes on its own thread.

mod command;
pub mod controller;

pub use command::{is_exit_keyword, Command, CommandChannel, CommandSender};
pub use controller::{
    ControllerSettings, ControllerState, ModeController, OperatingMode, RunReport,
};
