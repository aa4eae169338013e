pub mod endpoint;
pub mod system;

pub use endpoint::*;
pub use system::*;
