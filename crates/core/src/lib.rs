//! Core types, validation, and error taxonomy for the terminal-session gateway.

pub mod error;
pub mod limits;
pub mod session;
pub mod token;
pub mod validation;

pub use error::{Error, ErrorKind, LaunchFailure, Result};
pub use session::*;
pub use token::{is_valid_session_id, new_resume_token, new_session_id, TokenHasher};
