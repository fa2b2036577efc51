//! biomaj-download: distributed bulk-download service for biological data
//! banks, supporting FTP/FTPS/SFTP/HTTP(S)/rsync/iRODS/local/direct-variant
//! protocols (see DESIGN.md for the grounding ledger).

pub mod client;
pub mod config;
pub mod domain;
pub mod downloaders;
pub mod error;
pub mod message;
pub mod service;
pub mod supervisor;

pub use error::{DownloadError, Result};
