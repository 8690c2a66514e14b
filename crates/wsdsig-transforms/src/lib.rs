#![forbid(unsafe_code)]

//! Reference transform chains for wsdsig.
//!
//! Each `ds:Reference` carries a chain of transforms applied in order to
//! the referenced content. The last transform streams its output straight
//! into the digest.

pub mod chain;
pub mod exclusive;
pub mod factory;
pub mod str_transform;
pub mod transform;

pub use chain::TransformChain;
pub use exclusive::ExclusiveC14nTransform;
pub use factory::{TransformFactory, TransformReader};
pub use str_transform::{StrTransform, TokenMap, TokenReferenceResolver};
pub use transform::{Transform, TransformInput};
