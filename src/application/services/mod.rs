//! Application services

mod interrogator;

pub use interrogator::{create_interrogator, Interrogator, SharedInterrogator};
