// ── Domain model ──

pub mod command;
pub mod state;

pub use command::DeviceCommand;
pub use state::{DeviceState, Direction, FieldMap, PresetMode};
