//! Environment names: cheap-to-clone addresses on the dispatch bus.

use std::fmt;
use std::sync::Arc;

/// A named address on the effect bus.
///
/// Environments are compared by name; two `Environment` values with the
/// same name address the same listeners. Cloning shares the backing
/// string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Environment(Arc<str>);

impl Environment {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Environment {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
