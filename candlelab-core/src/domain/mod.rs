//! Domain types: bars and series invariants.

pub mod bar;
pub mod series;

pub use bar::Bar;
pub use series::{canonicalize, is_canonical};
