pub mod adapter;
pub mod client;
pub mod error;
pub mod external;
pub mod meta;
pub mod pipeline;
pub mod resource;
pub mod state;
pub mod workspace;

pub use error::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;
