//! Sampling Parameters
//!
//! [`ModelParams`] is a plain value. It is never mutated in place once
//! published: [`SharedParams`] hands out `Arc` snapshots and swaps in a whole
//! new value on update, so a request in flight always sees one complete
//! configuration.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected sampling parameters
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamsError {
    /// Temperature outside `0.0..=2.0`
    #[error("temperature must be within 0.0..=2.0, got {0}")]
    Temperature(f32),

    /// Top-p outside `(0.0, 1.0]`
    #[error("top_p must be within (0.0, 1.0], got {0}")]
    TopP(f32),

    /// Top-k of zero
    #[error("top_k must be at least 1")]
    TopK,
}

/// Sampling configuration sent with every upstream request
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    /// Sampling temperature
    pub temperature: f32,
    /// Nucleus sampling threshold
    pub top_p: f32,
    /// Top-k candidate cutoff
    pub top_k: u32,
    /// Reasoning mode used when a message carries no directive
    pub reasoning_default: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            temperature: 0.75,
            top_p: 0.92,
            top_k: 45,
            reasoning_default: true,
        }
    }
}

impl ModelParams {
    /// Check every field is within the range the upstream accepts
    ///
    /// # Errors
    ///
    /// Returns the first out-of-range field.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ParamsError::Temperature(self.temperature));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ParamsError::TopP(self.top_p));
        }
        if self.top_k == 0 {
            return Err(ParamsError::TopK);
        }
        Ok(())
    }

    /// Copy with a different reasoning default
    #[must_use]
    pub fn with_reasoning_default(mut self, enabled: bool) -> Self {
        self.reasoning_default = enabled;
        self
    }
}

/// Process-wide handle to the current [`ModelParams`]
///
/// Cloning the handle shares the same slot.
#[derive(Clone, Debug)]
pub struct SharedParams {
    current: Arc<RwLock<Arc<ModelParams>>>,
}

impl Default for SharedParams {
    fn default() -> Self {
        Self::new(ModelParams::default())
    }
}

impl SharedParams {
    /// Publish an initial value
    #[must_use]
    pub fn new(params: ModelParams) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(params))),
        }
    }

    /// Take a snapshot of the current value
    #[must_use]
    pub fn snapshot(&self) -> Arc<ModelParams> {
        Arc::clone(&self.current.read())
    }

    /// Replace the whole value
    ///
    /// Returns the previous snapshot.
    ///
    /// # Errors
    ///
    /// Rejects out-of-range values; the published value is left untouched.
    pub fn replace(&self, params: ModelParams) -> Result<Arc<ModelParams>, ParamsError> {
        params.validate()?;
        let previous = std::mem::replace(&mut *self.current.write(), Arc::new(params));
        tracing::info!(
            temperature = params.temperature,
            top_p = params.top_p,
            top_k = params.top_k,
            reasoning_default = params.reasoning_default,
            "Model parameters replaced"
        );
        Ok(previous)
    }

    /// Publish a copy of the current value with a new reasoning default
    pub fn set_reasoning_default(&self, enabled: bool) {
        let mut slot = self.current.write();
        let next = slot.with_reasoning_default(enabled);
        *slot = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let params = ModelParams::default();
        assert!((params.temperature - 0.75).abs() < f32::EPSILON);
        assert!((params.top_p - 0.92).abs() < f32::EPSILON);
        assert_eq!(params.top_k, 45);
        assert!(params.reasoning_default);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let hot = ModelParams {
            temperature: 2.5,
            ..Default::default()
        };
        assert_eq!(hot.validate(), Err(ParamsError::Temperature(2.5)));

        let no_p = ModelParams {
            top_p: 0.0,
            ..Default::default()
        };
        assert_eq!(no_p.validate(), Err(ParamsError::TopP(0.0)));

        let no_k = ModelParams {
            top_k: 0,
            ..Default::default()
        };
        assert_eq!(no_k.validate(), Err(ParamsError::TopK));
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let shared = SharedParams::default();
        let before = shared.snapshot();

        let next = ModelParams {
            temperature: 0.1,
            top_p: 0.5,
            top_k: 5,
            reasoning_default: false,
        };
        shared.replace(next).unwrap();

        // Old snapshot is untouched, new readers see the whole new value
        assert_eq!(*before, ModelParams::default());
        assert_eq!(*shared.snapshot(), next);
    }

    #[test]
    fn test_rejected_replace_keeps_value() {
        let shared = SharedParams::default();
        let bad = ModelParams {
            top_k: 0,
            ..Default::default()
        };
        assert!(shared.replace(bad).is_err());
        assert_eq!(*shared.snapshot(), ModelParams::default());
    }

    #[test]
    fn test_clones_share_slot() {
        let a = SharedParams::default();
        let b = a.clone();
        a.set_reasoning_default(false);
        assert!(!b.snapshot().reasoning_default);
    }

    #[test]
    fn test_concurrent_readers_never_see_mixed_values() {
        let shared = SharedParams::default();
        let low = ModelParams {
            temperature: 0.0,
            top_p: 0.1,
            top_k: 1,
            reasoning_default: false,
        };
        let high = ModelParams {
            temperature: 2.0,
            top_p: 1.0,
            top_k: 100,
            reasoning_default: true,
        };

        std::thread::scope(|scope| {
            let writer = shared.clone();
            scope.spawn(move || {
                for i in 0..500 {
                    let next = if i % 2 == 0 { low } else { high };
                    writer.replace(next).unwrap();
                }
            });

            for _ in 0..4 {
                let reader = shared.clone();
                scope.spawn(move || {
                    for _ in 0..500 {
                        let seen = *reader.snapshot();
                        assert!(
                            seen == low || seen == high || seen == ModelParams::default(),
                            "torn read: {seen:?}"
                        );
                    }
                });
            }
        });
    }
}
