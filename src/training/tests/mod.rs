//! Shared fixtures and cross-module tests for the fine-tuning pipeline
//!
//! Unit tests live next to the code they cover; the modules here exercise the
//! trainer and the full pipeline on a tiny on-disk checkpoint.


mod pipeline_tests;
