//! LoRA configuration types and utilities

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Main LoRA configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoraConfig {
    /// LoRA rank (size of the low-rank matrices)
    pub rank: usize,
    /// LoRA alpha (scaling factor)
    pub alpha: f32,
    /// Dropout probability applied to the adapter input
    pub dropout: f32,
    /// Encoder sub-layers receiving an adapter
    pub target_modules: Vec<String>,
    /// Weight-decomposed adaptation (DoRA)
    pub use_dora: bool,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            rank: 8,
            alpha: 16.0,
            dropout: 0.1,
            target_modules: vec!["query".to_string(), "value".to_string()],
            use_dora: true,
        }
    }
}

impl LoraConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), Error> {
        if self.rank == 0 {
            return Err(Error::InvalidInput("LoRA rank must be greater than 0".to_string()));
        }

        if self.rank > 512 {
            return Err(Error::InvalidInput(
                "LoRA rank should not exceed 512 for efficiency".to_string(),
            ));
        }

        if self.alpha <= 0.0 {
            return Err(Error::InvalidInput("LoRA alpha must be positive".to_string()));
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidInput("Dropout must be in [0.0, 1.0)".to_string()));
        }

        if self.target_modules.is_empty() {
            return Err(Error::InvalidInput(
                "At least one target module must be specified".to_string(),
            ));
        }

        let mut unique_modules = HashSet::new();
        for module in &self.target_modules {
            module.parse::<TargetModule>()?;
            if !unique_modules.insert(module) {
                return Err(Error::InvalidInput(format!("Duplicate target module: {}", module)));
            }
        }

        Ok(())
    }

    /// Get effective scaling factor (alpha / rank)
    pub fn scaling_factor(&self) -> f32 {
        self.alpha / self.rank as f32
    }

    /// Whether the given sub-layer is adapted
    pub fn targets_module(&self, module: TargetModule) -> bool {
        self.target_modules
            .iter()
            .any(|m| m.parse::<TargetModule>().map(|t| t == module).unwrap_or(false))
    }
}

/// Linear sub-layers of an encoder block that can carry an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetModule {
    /// Attention query projection
    Query,
    /// Attention key projection
    Key,
    /// Attention value projection
    Value,
    /// Attention output projection
    AttentionOutput,
    /// Feed-forward up projection
    Intermediate,
    /// Feed-forward down projection
    Output,
}

impl TargetModule {
    /// Configuration name of the module
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetModule::Query => "query",
            TargetModule::Key => "key",
            TargetModule::Value => "value",
            TargetModule::AttentionOutput => "attention_output",
            TargetModule::Intermediate => "intermediate",
            TargetModule::Output => "output",
        }
    }
}

impl FromStr for TargetModule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "query" => Ok(TargetModule::Query),
            "key" => Ok(TargetModule::Key),
            "value" => Ok(TargetModule::Value),
            "attention_output" => Ok(TargetModule::AttentionOutput),
            "intermediate" => Ok(TargetModule::Intermediate),
            "output" => Ok(TargetModule::Output),
            other => Err(Error::InvalidInput(format!("Unknown target module: {}", other))),
        }
    }
}

impl fmt::Display for TargetModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
