//! Data models for addonkit.
//!
//! Value types shared by the resolvers, the package database and the RPC
//! layer. All of them serialise to the shapes the JSON-RPC clients expect.

mod catalogue;
mod defn;
mod github;
mod pkg;

pub use catalogue::*;
pub use defn::*;
pub use github::*;
pub use pkg::*;

#[cfg(test)]
pub(crate) use pkg::test_support;
