//! Observable data.
//!
//! Plain data is modelled as a dynamic [`Value`]. Its containers,
//! [`Object`] and [`List`], route every read and write through explicit
//! methods, so observation never needs to patch anything at runtime:
//! [`observe`] attaches an [`Observer`], after which field writes and list
//! mutators notify the watchers that read them.

mod list;
mod object;
mod observer;
mod path;
mod snapshot;
mod value;

pub use list::List;
pub use object::Object;
pub use observer::{define_reactive, delete, observe, set, Observer};
pub use path::{Path, Segment};
pub use value::Value;
