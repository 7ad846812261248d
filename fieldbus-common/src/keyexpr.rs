//! Key expressions used by the bridge.
//!
//! ```text
//! <prefix>/<label>                   reading for one field
//! <prefix>/@/status                  bridge status
//! <prefix>/@/write/<label>           write request (payload: number or array)
//! <prefix>/@/write-result/<label>    write outcome
//! ```

/// Default key expression prefix.
pub const DEFAULT_KEY_PREFIX: &str = "fieldbus/modbus";

const WRITE_SEGMENT: &str = "@/write";
const WRITE_RESULT_SEGMENT: &str = "@/write-result";

/// Builder for the bridge's key expressions.
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

impl KeyExprBuilder {
    /// Create a builder rooted at `prefix` (trailing slashes are dropped).
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key for a field reading.
    ///
    /// # Example
    /// ```
    /// use fieldbus_common::keyexpr::KeyExprBuilder;
    ///
    /// let keys = KeyExprBuilder::default();
    /// assert_eq!(keys.reading("temp"), "fieldbus/modbus/temp");
    /// ```
    pub fn reading(&self, label: &str) -> String {
        format!("{}/{}", self.prefix, label)
    }

    /// Key for bridge status.
    pub fn status_key(&self) -> String {
        format!("{}/@/status", self.prefix)
    }

    /// Wildcard matching every write request.
    pub fn write_wildcard(&self) -> String {
        format!("{}/{}/*", self.prefix, WRITE_SEGMENT)
    }

    /// Key for a write request on `label`.
    pub fn write_key(&self, label: &str) -> String {
        format!("{}/{}/{}", self.prefix, WRITE_SEGMENT, label)
    }

    /// Key carrying the outcome of a write on `label`.
    pub fn write_result_key(&self, label: &str) -> String {
        format!("{}/{}/{}", self.prefix, WRITE_RESULT_SEGMENT, label)
    }

    /// Extract the label from a write request key.
    ///
    /// Returns `None` if the key is not a write request under this prefix.
    pub fn label_from_write_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        let label = key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?
            .strip_prefix(WRITE_SEGMENT)?
            .strip_prefix('/')?;
        (!label.is_empty()).then_some(label)
    }
}
