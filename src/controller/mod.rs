mod error;

pub use error::{ErrorKind, ProxyError};
