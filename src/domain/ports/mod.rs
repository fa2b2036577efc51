pub mod downloader;
pub mod queue;
pub mod session_store;

pub use downloader::{Downloader, HttpMethod};
pub use queue::{Delivery, Queue};
pub use session_store::SessionStore;
