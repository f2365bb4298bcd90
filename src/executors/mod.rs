//! Built-in executors.

mod exec;
mod http;

pub use exec::ExecExecutor;
pub use http::HttpExecutor;
