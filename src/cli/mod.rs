mod list;
mod post;
mod root;
mod theme;

pub use root::Cli;
