//! Keeper infrastructure layer.
//!
//! Persistence adapters, the versioned persistence DTOs with their
//! load-boundary normalization, the in-process event bus, and clock /
//! scheduler implementations.

pub mod bus;
pub mod clock;
pub mod config_loader;
pub mod dto;
pub mod file_adapter;
pub mod memory_adapter;

pub use bus::BroadcastEventBus;
pub use clock::{ManualClock, ManualScheduler, SystemClock, TokioScheduler};
pub use file_adapter::JsonFileKvAdapter;
pub use memory_adapter::MemoryKvAdapter;
