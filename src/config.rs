use crate::error::{MuxError, Result};
use crate::frame::HEADER_SIZE;

/// Largest frame the 16-bit length field can describe.
pub const MAX_FRAME_SIZE_LIMIT: usize = HEADER_SIZE + u16::MAX as usize;

/// Configuration for a multiplexed connection.
///
/// `Config` holds the tunable parameters shared by the codec, the outbound
/// queue and the chunked producer.
///
/// # Examples
///
/// ## Using default configuration
///
/// ```rust
/// use binmux::Config;
///
/// let config = Config::default();
/// assert_eq!(config.version, 1);
/// assert_eq!(config.chunk_size, 16 * 1024);
/// ```
///
/// ## Creating custom configuration
///
/// ```rust
/// use binmux::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .max_frame_size(64 * 1024)
///     .chunk_size(48 * 1024)
///     .build()
///     .expect("Valid configuration");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub version: u8,
    pub max_frame_size: usize,
    pub chunk_size: usize,
    pub send_queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            max_frame_size: 32 * 1024, // 32KB
            chunk_size: 16 * 1024,     // 16KB
            send_queue_capacity: 512,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.version == 0 {
            return Err(MuxError::Config("Version cannot be 0".to_string()));
        }

        if self.max_frame_size <= HEADER_SIZE {
            return Err(MuxError::Config(format!(
                "Max frame size must exceed the {HEADER_SIZE}-byte header"
            )));
        }

        if self.max_frame_size > MAX_FRAME_SIZE_LIMIT {
            return Err(MuxError::Config(format!(
                "Max frame size cannot exceed {MAX_FRAME_SIZE_LIMIT} bytes"
            )));
        }

        if self.chunk_size == 0 {
            return Err(MuxError::Config("Chunk size cannot be 0".to_string()));
        }

        if self.chunk_size + HEADER_SIZE > self.max_frame_size {
            return Err(MuxError::Config(
                "Chunk size plus header must fit in max frame size".to_string(),
            ));
        }

        if self.send_queue_capacity == 0 {
            return Err(MuxError::Config(
                "Send queue capacity cannot be 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Largest payload a single frame may carry.
    pub fn max_payload_size(&self) -> usize {
        self.max_frame_size.saturating_sub(HEADER_SIZE)
    }
}

/// Builder for creating custom `Config` instances.
///
/// Starts from [`Config::default`] and validates on [`ConfigBuilder::build`].
///
/// ```rust
/// use binmux::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .chunk_size(1024)
///     .send_queue_capacity(64)
///     .build()
///     .expect("Valid configuration");
/// assert_eq!(config.chunk_size, 1024);
/// ```
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn version(mut self, version: u8) -> Self {
        self.config.version = version;
        self
    }

    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn send_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.send_queue_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
