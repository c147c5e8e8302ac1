pub mod function;
pub mod reference;
pub mod value;

pub use function::*;
pub use reference::*;
pub use value::*;
