/// Configuration for the readiness adapter.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of live handles (slot table size). Must be < 2^24
    /// because the slot index is packed into 24 bits of `user_data`.
    pub max_handles: u32,
    /// Per-handle read-ahead buffer capacity in bytes. The standing read
    /// never asks the backend for more than the remaining room.
    pub read_ahead_capacity: usize,
    /// Per-handle write buffer capacity in bytes. In-flight bytes count
    /// against it until their write completes.
    pub write_capacity: usize,
    /// Number of SQ entries for the io_uring backend. CQ will be 4x this.
    pub sq_entries: u32,
    /// Maximum time in microseconds that one loop pass of [`run`] blocks
    /// waiting for completions. 0 = block until a completion arrives.
    /// Default: 1000 (1ms).
    ///
    /// [`run`]: crate::Adapter::run
    pub tick_timeout_us: u64,
    /// Enable TCP_NODELAY on sockets created by the io_uring backend.
    pub tcp_nodelay: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_handles: 1024,
            read_ahead_capacity: 16384,
            write_capacity: 16384,
            sq_entries: 256,
            tick_timeout_us: 1000,
            tcp_nodelay: true,
        }
    }
}

impl Config {
    /// Validate configuration values. Returns an error if any value is out of range.
    pub fn validate(&self) -> Result<(), crate::error::Error> {
        if self.max_handles == 0 || self.max_handles >= (1 << 24) {
            return Err(crate::error::Error::Config(
                "max_handles must be > 0 and < 2^24".into(),
            ));
        }
        if self.read_ahead_capacity == 0 || self.read_ahead_capacity > u32::MAX as usize {
            return Err(crate::error::Error::Config(
                "read_ahead_capacity must be > 0 and fit in u32".into(),
            ));
        }
        if self.write_capacity == 0 || self.write_capacity > u32::MAX as usize {
            return Err(crate::error::Error::Config(
                "write_capacity must be > 0 and fit in u32".into(),
            ));
        }
        if self.sq_entries == 0 || !self.sq_entries.is_power_of_two() {
            return Err(crate::error::Error::Config(
                "sq_entries must be > 0 and a power of two".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`Config`] with discoverable methods and `build()` validation.
///
/// # Example
///
/// ```rust
/// use ringline_ready::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .max_handles(256)
///     .read_ahead_capacity(8192)
///     .write_capacity(8192)
///     .tick_timeout_us(500)
///     .build()
///     .expect("invalid config");
/// assert_eq!(config.max_handles, 256);
/// ```
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default config values.
    pub fn new() -> Self {
        Self::default()
    }

    // ── Handle settings ──────────────────────────────────────────────

    /// Set the maximum number of live handles.
    pub fn max_handles(mut self, n: u32) -> Self {
        self.config.max_handles = n;
        self
    }

    // ── Buffer settings ──────────────────────────────────────────────

    /// Set the per-handle read-ahead buffer capacity.
    pub fn read_ahead_capacity(mut self, n: usize) -> Self {
        self.config.read_ahead_capacity = n;
        self
    }

    /// Set the per-handle write buffer capacity.
    pub fn write_capacity(mut self, n: usize) -> Self {
        self.config.write_capacity = n;
        self
    }

    // ── Backend settings ─────────────────────────────────────────────

    /// Set the number of SQ entries. Must be a power of 2.
    pub fn sq_entries(mut self, n: u32) -> Self {
        self.config.sq_entries = n;
        self
    }

    /// Enable or disable TCP_NODELAY on backend sockets.
    pub fn tcp_nodelay(mut self, enable: bool) -> Self {
        self.config.tcp_nodelay = enable;
        self
    }

    // ── Timing settings ──────────────────────────────────────────────

    /// Set the tick timeout in microseconds. 0 = block indefinitely.
    pub fn tick_timeout_us(mut self, us: u64) -> Self {
        self.config.tick_timeout_us = us;
        self
    }

    // ── Terminal ─────────────────────────────────────────────────────

    /// Validate and build the final [`Config`].
    pub fn build(self) -> Result<Config, crate::error::Error> {
        self.config.validate()?;
        Ok(self.config)
    }
}
