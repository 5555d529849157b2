mod auth;
mod dispatch;
mod handlers;
pub(crate) mod logging;
pub(crate) mod resolve;
mod router;
mod stream;

pub use router::create_proxy_router;
