use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure taxonomy of the isolation core.
///
/// Resolution deliberately reports only the final miss: per-candidate
/// filesystem errors are swallowed during the scan so one unreadable
/// candidate cannot mask a later valid one.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing or blank required setting. Fatal at construction, never
    /// retried.
    #[error("configuration value `{field}` {message}")]
    Configuration {
        field: &'static str,
        message: String,
    },

    /// The resolver exhausted every candidate.
    #[error("module `{requested}` not found (searched: {searched})")]
    ModuleNotFound { requested: String, searched: String },

    /// A resolved module could not be brought into a domain.
    #[error("failed to load module `{module}`: {details}")]
    ModuleLoad { module: String, details: String },

    /// Type lookup or construction failed inside a domain. The domain is
    /// left intact so the caller may inspect or retry.
    #[error("failed to instantiate `{type_name}` in domain `{domain}`: {details}")]
    Instantiation {
        domain: String,
        type_name: String,
        details: String,
    },

    /// An in-flight operation against a live instance raised.
    #[error("`{operation}` failed: {details}")]
    Invocation { operation: String, details: String },

    /// The proxy outlived its liveness guarantee; the underlying instance
    /// is gone.
    #[error("proxy for `{type_name}` is no longer valid: {reason}")]
    ProxyInvalid { type_name: String, reason: String },

    /// The isolation domain behind a handle has been torn down.
    #[error("isolation domain `{domain}` is unavailable: {reason}")]
    DomainUnavailable { domain: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn configuration(field: &'static str, message: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            message: message.into(),
        }
    }

    pub fn module_not_found(requested: impl Into<String>, searched: &[String]) -> Self {
        Self::ModuleNotFound {
            requested: requested.into(),
            searched: searched.join(", "),
        }
    }

    pub fn module_load(module: impl Into<String>, details: impl Into<String>) -> Self {
        Self::ModuleLoad {
            module: module.into(),
            details: details.into(),
        }
    }

    pub fn instantiation(
        domain: impl Into<String>,
        type_name: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::Instantiation {
            domain: domain.into(),
            type_name: type_name.into(),
            details: details.into(),
        }
    }

    pub fn invocation(operation: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Invocation {
            operation: operation.into(),
            details: details.into(),
        }
    }

    pub fn proxy_invalid(type_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProxyInvalid {
            type_name: type_name.into(),
            reason: reason.into(),
        }
    }

    pub fn domain_unavailable(domain: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DomainUnavailable {
            domain: domain.into(),
            reason: reason.into(),
        }
    }
}
