pub mod artifacts;
pub mod inference;
pub mod model;
pub mod recommendation;
pub mod store;
pub mod summary;
