//! jspanel: container lifecycle and data-directory management for a
//! single-operator control panel.

pub mod api;
pub mod auth;
pub mod config;
pub mod container;
pub mod datadir;
pub mod error;
pub mod files;
pub mod lifecycle;
pub mod logs;
pub mod scaffold;

pub use error::{PanelError, PanelResult};
