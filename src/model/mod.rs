//! Sequence classification model and the files it is built from

pub mod classifier;
pub mod files;

pub use classifier::{argmax_last, SequenceClassifier};
pub use files::ModelFiles;
