//! Download client (C7): remote-mode queue submission and local-mode
//! worker pool over the same session-store polling contract.

pub mod download_client;

pub use download_client::{LocalDownloadClient, RemoteDownloadClient};
