//! Shared store - the polymorphic key-value map carried through execution
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`value`] | Reified `Value` variant (Null/Bool/Int/Float/Str/Bytes/List/Map) |
//! | [`shared`] | Thread-safe store with per-node namespaces and `__` system keys |

pub mod shared;
pub mod value;

pub use shared::SharedStore;
pub use value::{parse_path, PathSeg, PathVec, Value, ValueMap};
