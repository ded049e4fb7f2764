//! Values and the object graph.

mod node;
pub mod temporal;
mod value;

pub use node::{Node, Slot};
pub use value::Value;
