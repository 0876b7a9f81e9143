pub mod cursor;
pub mod order;
pub mod signal;
pub mod state;
pub mod status;

pub use cursor::*;
pub use order::*;
pub use signal::*;
pub use state::*;
pub use status::*;
