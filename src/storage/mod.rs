pub mod upload;

pub use upload::StorageClient;
