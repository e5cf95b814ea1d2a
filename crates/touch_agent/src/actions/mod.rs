//! Action handling module for processing model outputs
//!
//! This module provides:
//! - `parser`: the action DSL and grid coordinates
//! - `handler`: action execution against the automation surface

mod handler;
mod parser;

pub use handler::{ActionHandler, ActionResult};
pub use parser::{parse_action, ActionCommand, GridPoint, GRID_MAX, MAX_WAIT_SECONDS};
