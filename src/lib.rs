//! Core of a hover-activated quick launcher dock: the persisted list of
//! pinned apps, icon resolution, drag reordering and the dock's visibility
//! state machine. Rendering is left to the host through [`host::Renderer`].

pub mod config;
pub mod controller;
pub mod error;
pub mod host;
pub mod icon;
pub mod model;
pub mod relay;
pub mod reorder;
pub mod shortcut;
pub mod store;
pub mod visibility;

pub use config::DockConfig;
pub use controller::{DockController, DockEvent, DockInput};
pub use error::{DockError, Result};
pub use host::{run_host, HostEvent, Renderer};
pub use model::{AppItem, AppList, Location};
pub use store::{AppStore, KeyValueStore, MemoryStore, SqliteStore};
