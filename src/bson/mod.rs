//! BSON document model: zero-copy view/iteration (component D), an owned
//! growable document with a splicing mutator (component E), tagged-union
//! value references (component F), and parser combinators over all three
//! (component G).

pub mod document;
pub mod parser;
pub mod value;
pub mod view;

pub use document::Document;
pub use value::{Value, ValueRef};
pub use view::{BsonError, ElementRef, TypeTag, View};
