pub mod collection;
pub mod config;
pub mod console;
pub mod context;
pub mod datetime;
pub mod default_flag;
pub mod entries;
pub mod gateway;
pub mod list_command;
pub mod logging;
pub mod pocketbase;
pub mod profile;
pub mod project;
pub mod realtime;
pub mod record;
pub mod sse;
pub mod store;
pub mod tag;
pub mod task;
pub mod time_entry;
pub mod timer_command;
pub mod user;
pub mod watch_command;

#[cfg(test)]
mod testing;
