//! Operational transform primitives: the operation model, the transform
//! engine and content application.

mod apply;
mod operation;
mod transform;

pub use apply::{Applied, apply_components, apply_exact};
pub use operation::{Component, OpKind, Operation, OperationPayload};
pub use transform::{transform, transform_all, transform_component, transform_sequences};
