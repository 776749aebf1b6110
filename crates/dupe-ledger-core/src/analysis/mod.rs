pub mod duplicates;
pub mod similarity;

pub use duplicates::{find_duplicates, DuplicateGroup, DuplicateGroups, DuplicateReport};
pub use similarity::{
    find_similar_directories, ComparisonScope, SimilarityOptions, SimilarityPair,
};
