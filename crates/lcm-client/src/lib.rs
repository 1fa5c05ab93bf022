pub mod http;
pub mod realtime;

pub use http::{HttpService, Session};
pub use realtime::RealtimeOptions;
