use std::env;

/// Source of configuration variables.
///
/// Implemented by [`SystemEnv`] for the real process environment and by
/// [`InMemoryEnv`] in tests.
pub trait ReadEnv {
    fn var(&self, key: &str) -> Result<String, env::VarError>;
}

/// Zero-sized type, delegates to `std::env`.
pub struct SystemEnv;

impl ReadEnv for SystemEnv {
    #[inline]
    fn var(&self, key: &str) -> Result<String, env::VarError> {
        env::var(key)
    }
}

#[cfg(test)]
pub use in_memory::InMemoryEnv;

#[cfg(test)]
mod in_memory {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::env;

    use super::ReadEnv;

    /// Won't touch the global process environment.
    #[derive(Default)]
    pub struct InMemoryEnv {
        vars: RefCell<HashMap<String, String>>,
    }

    impl InMemoryEnv {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
            self.vars.borrow_mut().insert(key.into(), value.into());
        }

        pub fn remove(&self, key: &str) {
            self.vars.borrow_mut().remove(key);
        }
    }

    impl ReadEnv for InMemoryEnv {
        fn var(&self, key: &str) -> Result<String, env::VarError> {
            self.vars
                .borrow()
                .get(key)
                .cloned()
                .ok_or(env::VarError::NotPresent)
        }
    }
}
