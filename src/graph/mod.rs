//! Graph layer: SQLite-backed store plus the upload, merge, selection and
//! visualization engines that run on top of it.

pub mod merge;
pub mod selection;
pub mod setops;
pub mod store;
pub mod upload;
pub mod visualization;

pub use merge::BranchMerger;
pub use selection::TestSelector;
pub use store::{Filter, GraphStore, SetCollection};
pub use upload::PartialUploader;
pub use visualization::VisGraphBuilder;
