pub mod cache;
pub mod http;
pub mod language;
pub mod logging;
pub mod timing;
