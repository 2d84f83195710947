//! Provisioner state handling: the versioned tfstate document and its
//! durable encoded form.

pub mod v4;

pub use v4::StateV4;
