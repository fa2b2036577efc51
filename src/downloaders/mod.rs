//! Protocol adapters implementing the `Downloader` port (spec §4.1).

pub mod archive_probe;
pub mod direct;
pub mod ftp;
pub mod http;
pub mod irods;
pub mod listing;
pub mod local;
pub mod rsync;
pub mod sftp;

pub use direct::{DirectFtpDownloader, DirectHttpDownloader};
pub use ftp::FtpDownloader;
pub use http::HttpDownloader;
pub use irods::IrodsDownloader;
pub use local::LocalDownloader;
pub use rsync::RsyncDownloader;
pub use sftp::{SftpDownloader, SshNewHostPolicy};
