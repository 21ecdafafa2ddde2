pub mod cache;
pub mod client;
pub mod resource;

/// Default user agent for `kruit` - automatically uses the package version
///
/// Can be overridden via the `KRUIT_USER_AGENT` environment variable, see
/// [`client::user_agent`].
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
