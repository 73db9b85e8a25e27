pub mod id;
pub mod time;

pub use id::PrefixedId;
pub use time::Timestamp;
