pub mod artifacts;
pub mod input;

pub use artifacts::*;
pub use input::*;
