pub mod traits;
pub mod web;

pub use traits::SessionDriver;
pub use web::{PageSnapshot, WebSession};
