mod core;
mod insert_object;
mod ops;
mod plugin;
mod schema;
mod selection;
mod serde_value;
mod writer;

pub use crate::core::*;
pub use crate::insert_object::*;
pub use crate::ops::*;
pub use crate::plugin::*;
pub use crate::schema::*;
pub use crate::selection::*;
pub use crate::serde_value::*;
pub use crate::writer::*;
