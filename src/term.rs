mod confirm;

pub use confirm::{Choice, Confirm};
