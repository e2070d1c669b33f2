//! API implementation submodules.
//!
//! Each submodule contains `impl AddonkitApi` blocks that extend the public
//! API with domain-specific methods. The struct definition remains in
//! `lib.rs`.

mod builder;
mod github_auth;
mod pkgs;
mod profiles;
mod reconcile;

pub use builder::AddonkitApiBuilder;
