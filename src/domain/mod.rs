//! Domain types shared by the runtime and the HTTP surface

mod agent;
mod card;
mod delegation;
mod session;

pub use agent::*;
pub use card::*;
pub use delegation::*;
pub use session::*;
