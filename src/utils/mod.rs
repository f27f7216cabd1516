pub mod threads;
pub mod time;
