//! Error categories shared across the courier crates.
//!
//! Every public error type in this workspace implements [`Categorized`], and
//! wrapping variants delegate to the category of their cause. Retry policies
//! and alert routing branch on the [`Category`] rather than on concrete types.

/// Coarse classification of a courier error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Invalid or unresolvable configuration.
    Config,
    /// Broker or database unreachable, including transient resolution failures.
    Connection,
    /// Record-level produce failure after retries are exhausted.
    Producer,
    /// Failure propagated from a consumer callback.
    Consumer,
    /// Topic management failure other than idempotent no-ops.
    Admin,
    /// A deadline elapsed at an operation boundary.
    Timeout,
    /// Caller contract violation, such as an empty topic or missing argument.
    InvalidArgument,
    /// Sharding or storage-layer failure.
    Storage,
}

impl Category {
    /// Whether errors of this category are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Category::Connection | Category::Timeout)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Category::Config => "config",
            Category::Connection => "connection",
            Category::Producer => "producer",
            Category::Consumer => "consumer",
            Category::Admin => "admin",
            Category::Timeout => "timeout",
            Category::InvalidArgument => "invalid-argument",
            Category::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// An error which carries a [`Category`].
///
/// Implementations on wrapping variants must return the category of the
/// underlying cause, so that categorization survives arbitrary nesting.
pub trait Categorized: std::error::Error {
    fn category(&self) -> Category;

    fn is_config(&self) -> bool {
        self.category() == Category::Config
    }
    fn is_connection(&self) -> bool {
        self.category() == Category::Connection
    }
    fn is_producer(&self) -> bool {
        self.category() == Category::Producer
    }
    fn is_consumer(&self) -> bool {
        self.category() == Category::Consumer
    }
    fn is_admin(&self) -> bool {
        self.category() == Category::Admin
    }
    fn is_timeout(&self) -> bool {
        self.category() == Category::Timeout
    }
    fn is_invalid_argument(&self) -> bool {
        self.category() == Category::InvalidArgument
    }
    fn is_storage(&self) -> bool {
        self.category() == Category::Storage
    }
    fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum Inner {
        #[error("broker unreachable")]
        Unreachable,
    }

    impl Categorized for Inner {
        fn category(&self) -> Category {
            Category::Connection
        }
    }

    #[derive(Debug, thiserror::Error)]
    enum Outer {
        #[error("send failed")]
        Send(#[source] Inner),
    }

    impl Categorized for Outer {
        fn category(&self) -> Category {
            match self {
                Outer::Send(inner) => inner.category(),
            }
        }
    }

    #[test]
    fn category_survives_wrapping() {
        let err = Outer::Send(Inner::Unreachable);
        assert!(err.is_connection());
        assert!(err.is_retryable());
        assert!(!err.is_producer());

        // The causal chain is still reachable through source().
        let source = std::error::Error::source(&err).expect("wrapped cause");
        assert_eq!(source.to_string(), "broker unreachable");
    }

    #[test]
    fn retryable_categories() {
        assert!(Category::Connection.is_retryable());
        assert!(Category::Timeout.is_retryable());
        for c in [
            Category::Config,
            Category::Producer,
            Category::Consumer,
            Category::Admin,
            Category::InvalidArgument,
            Category::Storage,
        ] {
            assert!(!c.is_retryable(), "{c} must terminate the record");
        }
    }
}
