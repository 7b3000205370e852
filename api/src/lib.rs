#[macro_use]
extern crate tracing;

mod client;
mod error;
pub mod session;
pub mod wire;

pub use client::{
    ApiClient,
    NewGroup,
};
pub use error::ApiError;

pub type Result<T, E = ApiError> = std::result::Result<T, E>;
