//! Dataset construction for siamese image-pair change classification.
//!
//! This crate provides utilities for:
//! - Loading labeled pair identifiers from CSV
//! - Decoding identifiers and resolving them to image files on disk
//! - Class-balanced resampling of positives and negatives
//! - Parallel decoding of image pairs into flat batches
//! - Zero-centering and train/validation/test splitting

// Module declarations
pub mod identifier;
pub mod labels;
pub mod loader;
pub mod preprocess;
pub mod resolver;
pub mod sampler;
pub mod types;

// Re-export public API
pub use identifier::{IdentifierError, PairIdentifier};
pub use labels::{load_labels, parse_labels, LabelStoreConfig, LabelSummary};
pub use loader::{load_resized, IntegrityPolicy, LoadStats, PairLoader, ResolvedPair};
pub use preprocess::{
    prepare, split_counts, split_indices, zero_center, PreparedSplits, SplitIndices, SplitRatios,
};
pub use resolver::{default_extensions, FolderIndex, ImageFolder, ImagePairPaths};
pub use sampler::{
    prune_per_class, prune_per_class_by, BalancedSampler, SampledPair, DEFAULT_PER_CLASS_CAP,
};
pub use types::*;
