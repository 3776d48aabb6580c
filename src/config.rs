#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Prepended to every KV key.
    pub key_prefix: String,
    /// Separator inside keys; must not occur in job, trigger, group or
    /// calendar names.
    pub key_delimiter: String,
    /// Owner token embedded in fired-trigger records and the mutex value.
    pub instance_id: String,
    /// TTL of the distributed mutex key in milliseconds.
    pub lock_timeout_ms: u64,
    /// Age past which a fired-trigger record is considered orphaned.
    pub trigger_lock_timeout_ms: u64,
    /// How far past its fire time a trigger may run before it misfires.
    pub misfire_threshold_ms: u64,
    /// Bounds for the jittered sleep between mutex acquisition attempts.
    pub lock_backoff_min_ms: u64,
    pub lock_backoff_max_ms: u64,
    /// Connection string handed to the KV client (endpoints, credentials and
    /// database index are all carried in the URL).
    pub redis_url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cronstore".to_string(),
            key_delimiter: ":".to_string(),
            instance_id: "default".to_string(),
            lock_timeout_ms: 5_000,
            trigger_lock_timeout_ms: 300_000,
            misfire_threshold_ms: 60_000,
            lock_backoff_min_ms: 10,
            lock_backoff_max_ms: 50,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Default::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_misfire_threshold_ms(mut self, ms: u64) -> Self {
        self.misfire_threshold_ms = ms;
        self
    }

    pub fn with_trigger_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.trigger_lock_timeout_ms = ms;
        self
    }

    pub fn with_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = ms;
        self
    }
}
