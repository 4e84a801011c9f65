pub mod claims;
pub mod protocol;

pub use claims::*;
pub use protocol::*;
