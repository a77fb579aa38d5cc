//! Seams between the coordinator and the outside world

mod catalog;
mod sink;

pub use catalog::CatalogSource;
pub use sink::CommandSink;
