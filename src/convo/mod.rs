pub mod flow;
pub mod state;

pub use flow::{ConvoService, Reply};
pub use state::{ConvoState, Step};
