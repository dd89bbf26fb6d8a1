pub mod config;
pub mod delay;
pub mod parse;
pub mod run;
