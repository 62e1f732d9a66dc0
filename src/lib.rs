//! ShelfSwap: a book registry, the swap request engine that trades books
//! between users, and the notifications each swap produces.

pub mod app;
pub mod client_store;
pub mod error;
pub mod modules;

#[cfg(test)]
mod test_support;

pub use app::App;
pub use client_store::ClientStore;
pub use error::{ServiceError, ServiceResult};
