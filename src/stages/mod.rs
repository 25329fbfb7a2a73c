pub mod context;
pub mod extract;
pub mod reference_analysis;
pub mod round;
pub mod stage_runner;
pub mod synthesis;

pub use context::*;
pub use extract::*;
pub use reference_analysis::*;
pub use round::*;
pub use stage_runner::*;
pub use synthesis::*;
