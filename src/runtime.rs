mod clinit;
mod config;
mod coordinator;
mod env;
mod heap;
mod structs;

#[cfg(test)]
pub(crate) mod testing;

pub use clinit::*;
pub use config::*;
pub use coordinator::*;
pub use env::*;
pub use heap::*;
pub use structs::*;
