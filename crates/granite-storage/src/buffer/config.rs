//! Buffer pool configuration.

use granite_common::{DEFAULT_POOL_SIZE, DEFAULT_REPLACER_K};

/// Configuration for the buffer pool.
#[derive(Debug, Clone)]
pub struct BufferPoolConfig {
    /// Number of frames in the pool.
    pub num_frames: usize,
    /// K for the LRU-K replacer.
    pub replacer_k: usize,
}

impl BufferPoolConfig {
    /// Creates a configuration with the given frame count and default K.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            replacer_k: DEFAULT_REPLACER_K,
        }
    }

    /// Sets the LRU-K parameter.
    #[must_use]
    pub fn with_replacer_k(mut self, k: usize) -> Self {
        self.replacer_k = k;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_frames == 0 {
            return Err("buffer pool must have at least one frame".to_string());
        }
        if self.replacer_k == 0 {
            return Err("replacer K must be at least 1".to_string());
        }
        Ok(())
    }
}

impl Default for BufferPoolConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(BufferPoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_frames_rejected() {
        assert!(BufferPoolConfig::new(0).validate().is_err());
    }

    #[test]
    fn test_zero_k_rejected() {
        assert!(BufferPoolConfig::new(4).with_replacer_k(0).validate().is_err());
    }
}
