pub mod directory;
pub mod membership;
pub mod room;
pub mod store;
