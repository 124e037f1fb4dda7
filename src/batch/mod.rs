pub mod driver;

pub use driver::{BatchDriver, BatchReport};
