//! Session registry and lifecycle for the terminal-session gateway.
//!
//! [`SessionService`] owns every live session: it launches processes
//! through a [`launcher::Launcher`], records metadata in a
//! [`metadata_store::MetadataStore`], and authorizes each operation by
//! resume-token hash.

pub mod config;
mod registry;
pub mod service;

pub use config::SessionConfig;
pub use service::{OpenedSession, SessionService};
