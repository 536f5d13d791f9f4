mod client;
mod clock;
mod config;
mod eval;
mod fetch;
mod flag;
mod flag_value;
mod identity;
mod refresh;
mod rule;
mod store;
mod test_common;

pub use client::*;
pub use clock::*;
pub use config::*;
pub use eval::*;
pub use fetch::*;
pub use flag::*;
pub use flag_value::*;
pub use identity::*;
pub use refresh::*;
pub use rule::*;
pub use store::*;
