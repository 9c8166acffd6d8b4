//! CDN endpoint selection.
//!
//! Every package specifier (`name@version/path`) is turned into a URL under one
//! content-delivery mirror. The mirror is picked once per session by racing a
//! lightweight probe against each candidate and keeping the first to answer.

mod probe;
mod resolver;

pub use probe::{HttpProbe, OfflineProbe, Probe};
pub use resolver::{EndpointResolver, UrlError, DEFAULT_PROVIDER, DEFAULT_TIMEOUT_MS};
