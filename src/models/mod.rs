pub mod event;
pub mod expert;
pub mod record;
pub mod reference;

pub use event::*;
pub use expert::*;
pub use record::*;
pub use reference::*;
