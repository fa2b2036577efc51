//! Download service, queue transport and session-store backends (C5/C6).

pub mod download_service;
pub mod queue_amqp;
pub mod session_store_memory;
pub mod session_store_redis;

pub use download_service::{build_downloader, DownloadService};
pub use queue_amqp::AmqpQueue;
pub use session_store_memory::MemorySessionStore;
pub use session_store_redis::RedisSessionStore;
