pub mod args;
pub mod op;
pub mod ops;

pub use ops::{
    Create, Daemon, Export, Import, Init, List, Lookup, Popularity, Results, Show, Subscribe,
    Version,
};
