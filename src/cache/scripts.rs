//! Script registry.
//!
//! Scripts are addressed by the SHA-1 digest of their source, the same digest
//! the store computes on `SCRIPT LOAD`. Registration checks for the digest
//! first and only uploads the source when it is missing, so it can run on
//! every startup and from several processes at once.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use sha1::{Digest, Sha1};
use tracing::debug;

use super::error::{PopularError, StoreError};

/// Raw reply of a script execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptReply {
    Nil,
    Integer(i64),
    Text(String),
}

/// Scripting primitives exposed by a store backend.
#[async_trait]
pub trait ScriptBackend: Send + Sync {
    async fn script_exists(&self, sha: &str) -> Result<bool, StoreError>;

    /// Upload `source` and return the digest the store assigned to it.
    async fn script_load(&self, source: &str) -> Result<String, StoreError>;

    async fn eval_sha(
        &self,
        sha: &str,
        keys: &[String],
        args: &[String],
    ) -> Result<ScriptReply, StoreError>;
}

/// Lowercase hex SHA-1 of a script source.
pub fn script_sha1(source: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(source.as_bytes());
    hex::encode(hasher.finalize())
}

/// Callable reference to a script known to be loaded in the store.
#[derive(Clone)]
pub struct ScriptHandle {
    name: String,
    sha: String,
    num_keys: usize,
    backend: Arc<dyn ScriptBackend>,
}

impl ScriptHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sha(&self) -> &str {
        &self.sha
    }

    pub fn num_keys(&self) -> usize {
        self.num_keys
    }

    /// Execute the script atomically against the store.
    pub async fn call(&self, keys: &[String], args: &[String]) -> Result<ScriptReply, PopularError> {
        if keys.len() != self.num_keys {
            return Err(PopularError::ScriptArity {
                name: self.name.clone(),
                expected: self.num_keys,
                actual: keys.len(),
            });
        }

        self.backend
            .eval_sha(&self.sha, keys, args)
            .await
            .map_err(PopularError::StoreUnavailable)
    }
}

impl fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("name", &self.name)
            .field("sha", &self.sha)
            .field("num_keys", &self.num_keys)
            .finish()
    }
}

#[derive(Clone)]
pub struct ScriptRegistry {
    backend: Arc<dyn ScriptBackend>,
}

impl ScriptRegistry {
    pub fn new(backend: Arc<dyn ScriptBackend>) -> Self {
        Self { backend }
    }

    /// Ensure `source` is loaded and return a handle bound to `num_keys`.
    pub async fn register(
        &self,
        name: &str,
        source: &str,
        num_keys: usize,
    ) -> Result<ScriptHandle, PopularError> {
        let sha = script_sha1(source);
        let load_failure = |source: StoreError| PopularError::ScriptLoadFailure {
            name: name.to_string(),
            source,
        };

        let exists = self
            .backend
            .script_exists(&sha)
            .await
            .map_err(load_failure)?;

        if exists {
            debug!(
                target = "popcache::cache::scripts",
                script = name,
                sha = %sha,
                "script already loaded"
            );
        } else {
            debug!(
                target = "popcache::cache::scripts",
                script = name,
                sha = %sha,
                "loading script"
            );
            let loaded = self.backend.script_load(source).await.map_err(load_failure)?;
            if !loaded.eq_ignore_ascii_case(&sha) {
                return Err(load_failure(StoreError::protocol(format!(
                    "store assigned digest `{loaded}`, expected `{sha}`"
                ))));
            }
        }

        Ok(ScriptHandle {
            name: name.to_string(),
            sha,
            num_keys,
            backend: self.backend.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingBackend {
        loaded: Mutex<Vec<String>>,
        loads: AtomicUsize,
        fail_exists: bool,
        wrong_digest: bool,
    }

    #[async_trait]
    impl ScriptBackend for CountingBackend {
        async fn script_exists(&self, sha: &str) -> Result<bool, StoreError> {
            if self.fail_exists {
                return Err(StoreError::unavailable("connection refused"));
            }
            Ok(self.loaded.lock().unwrap().iter().any(|s| s == sha))
        }

        async fn script_load(&self, source: &str) -> Result<String, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.wrong_digest {
                return Ok("0".repeat(40));
            }
            let sha = script_sha1(source);
            self.loaded.lock().unwrap().push(sha.clone());
            Ok(sha)
        }

        async fn eval_sha(
            &self,
            _sha: &str,
            keys: &[String],
            _args: &[String],
        ) -> Result<ScriptReply, StoreError> {
            Ok(ScriptReply::Integer(keys.len() as i64))
        }
    }

    #[test]
    fn sha1_matches_known_digest() {
        assert_eq!(
            script_sha1("abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[tokio::test]
    async fn register_loads_once() {
        let backend = Arc::new(CountingBackend::default());
        let registry = ScriptRegistry::new(backend.clone());

        let first = registry
            .register("INCR", "return 1", 2)
            .await
            .expect("first registration");
        let second = registry
            .register("INCR", "return 1", 2)
            .await
            .expect("second registration");

        assert_eq!(first.sha(), second.sha());
        assert_eq!(first.sha(), script_sha1("return 1"));
        assert_eq!(backend.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn existence_check_failure_is_a_load_failure() {
        let backend = Arc::new(CountingBackend {
            fail_exists: true,
            ..Default::default()
        });
        let registry = ScriptRegistry::new(backend.clone());

        let err = registry.register("INCR", "return 1", 2).await.unwrap_err();
        assert!(matches!(err, PopularError::ScriptLoadFailure { ref name, .. } if name == "INCR"));
        assert_eq!(backend.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mismatched_digest_is_rejected() {
        let backend = Arc::new(CountingBackend {
            wrong_digest: true,
            ..Default::default()
        });
        let registry = ScriptRegistry::new(backend);

        let err = registry.register("INCR", "return 1", 2).await.unwrap_err();
        assert!(matches!(
            err,
            PopularError::ScriptLoadFailure {
                source: StoreError::Protocol { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn handle_enforces_key_count() {
        let registry = ScriptRegistry::new(Arc::new(CountingBackend::default()));
        let handle = registry
            .register("INCR", "return 1", 2)
            .await
            .expect("registration");

        let err = handle
            .call(&["only-one".to_string()], &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PopularError::ScriptArity {
                expected: 2,
                actual: 1,
                ..
            }
        ));

        let reply = handle
            .call(&["a".to_string(), "b".to_string()], &["1".to_string()])
            .await
            .expect("call succeeds");
        assert_eq!(reply, ScriptReply::Integer(2));
    }
}
