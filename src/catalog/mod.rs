mod tilecatalog;

pub use tilecatalog::{TileCatalog, PURGATORY, ROOT_PILE};
