pub mod env;
pub mod loader;
pub mod types;
pub mod validator;

pub use env::*;
pub use loader::*;
pub use types::*;
pub use validator::*;
