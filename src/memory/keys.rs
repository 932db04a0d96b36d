//! Backing store key layout
//!
//! Every session owns up to three keys, all TTL-eligible:
//! `{prefix}:session:{id}:messages`, `{prefix}:session:{id}:config`
//! and `{prefix}:session:{id}:version`.

const DEFAULT_KEY_PREFIX: &str = "stm";

#[derive(Debug, Clone)]
pub struct SessionKeys {
    prefix: String,
}

impl SessionKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim().trim_end_matches(':');
        Self {
            prefix: if prefix.is_empty() {
                DEFAULT_KEY_PREFIX.to_string()
            } else {
                prefix.to_string()
            },
        }
    }

    pub fn messages(&self, session_id: &str) -> String {
        format!("{}:session:{}:messages", self.prefix, session_id)
    }

    pub fn config(&self, session_id: &str) -> String {
        format!("{}:session:{}:config", self.prefix, session_id)
    }

    pub fn version(&self, session_id: &str) -> String {
        format!("{}:session:{}:version", self.prefix, session_id)
    }
}

impl Default for SessionKeys {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let keys = SessionKeys::default();
        assert_eq!(keys.messages("abc"), "stm:session:abc:messages");
        assert_eq!(keys.config("abc"), "stm:session:abc:config");
        assert_eq!(keys.version("abc"), "stm:session:abc:version");
    }

    #[test]
    fn test_prefix_normalized() {
        assert_eq!(SessionKeys::new("tenant-a:").messages("s"), "tenant-a:session:s:messages");
        assert_eq!(SessionKeys::new("  ").messages("s"), "stm:session:s:messages");
    }
}
