#![deny(unsafe_code)]

pub mod algebra;
pub mod config;
pub mod input;
pub mod net;
pub mod protocols;
pub mod schemes;

#[cfg(test)]
mod testing;
