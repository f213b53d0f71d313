//! SSH module - connection and authentication
//!
//! Establishes the authenticated SSH connection the SFTP subsystem runs on,
//! using the russh library.

mod client;
mod config;
mod error;

pub use client::{fingerprint, open_sftp, ClientHandler, SshClient, SshHandle};
pub use config::{AuthMethod, SshConfig};
pub use error::SshError;
