pub mod application;
pub mod history;
pub mod pf_continue;
pub mod user;

pub use application::*;
pub use history::*;
pub use pf_continue::*;
pub use user::*;
