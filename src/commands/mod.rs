/// `commands/` — chat commands that run, define and show scripts
pub mod book;
pub mod rate_limit;
pub mod script_commands;

pub use book::CommandBook;
pub use rate_limit::RateLimiter;
pub use script_commands::{ChatLine, CommandDispatcher, Outcome, Privilege};
