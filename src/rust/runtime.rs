use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use ort::Result as OrtResult;
use std::sync::OnceLock;

use crate::classifier::ClassifierError;

static INIT: OnceLock<Result<(), String>> = OnceLock::new();

/// Threading and graph optimisation settings for ONNX Runtime sessions.
#[derive(Debug)]
pub struct RuntimeConfig {
    pub inter_threads: usize,
    pub intra_threads: usize,
    pub optimization_level: GraphOptimizationLevel,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            inter_threads: 0, // Let ONNX Runtime decide
            intra_threads: 0, // Let ONNX Runtime decide
            optimization_level: GraphOptimizationLevel::Level3,
        }
    }
}

impl Clone for RuntimeConfig {
    fn clone(&self) -> Self {
        Self {
            inter_threads: self.inter_threads,
            intra_threads: self.intra_threads,
            optimization_level: copy_level(&self.optimization_level),
        }
    }
}

fn copy_level(level: &GraphOptimizationLevel) -> GraphOptimizationLevel {
    match level {
        GraphOptimizationLevel::Level1 => GraphOptimizationLevel::Level1,
        GraphOptimizationLevel::Level2 => GraphOptimizationLevel::Level2,
        GraphOptimizationLevel::Level3 => GraphOptimizationLevel::Level3,
        GraphOptimizationLevel::Disable => GraphOptimizationLevel::Disable,
    }
}

fn init_onnx_environment() -> OrtResult<()> {
    ort::init()
        .with_name("greenguardian")
        .commit()?;
    Ok(())
}

/// Commits the process-wide ONNX Runtime environment once.
pub fn ensure_initialized() -> Result<(), ClassifierError> {
    INIT.get_or_init(|| init_onnx_environment().map_err(|e| e.to_string()))
        .clone()
        .map_err(|e| ClassifierError::BuildError(format!("Failed to initialize ONNX Runtime: {}", e)))
}

pub fn create_session_builder(config: &RuntimeConfig) -> Result<SessionBuilder, ClassifierError> {
    ensure_initialized()?;
    let mut builder = Session::builder()?;

    if config.inter_threads > 0 {
        builder = builder.with_inter_threads(config.inter_threads)?;
    }
    if config.intra_threads > 0 {
        builder = builder.with_intra_threads(config.intra_threads)?;
    }

    builder = builder.with_optimization_level(copy_level(&config.optimization_level))?;

    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_clone_keeps_settings() {
        let config = RuntimeConfig {
            inter_threads: 2,
            intra_threads: 4,
            optimization_level: GraphOptimizationLevel::Level1,
        };
        let cloned = config.clone();
        assert_eq!(cloned.inter_threads, 2);
        assert_eq!(cloned.intra_threads, 4);
        assert!(matches!(cloned.optimization_level, GraphOptimizationLevel::Level1));
    }
}
