//! Sources for the remote signing secret.

/// Environment variable read by [`EnvCredential::default`].
pub const DEFAULT_CREDENTIAL_VAR: &str = "ENCRYPTION_PRIVATE_KEY";

/// Supplies the secret a remote identity is derived from.
pub trait CredentialSource {
    /// Name of the credential, shown to the user when it is missing.
    fn name(&self) -> &str;

    /// The secret, if one is available. Blank values count as absent.
    fn secret(&self) -> Option<String>;
}

/// Reads the secret from a process environment variable.
#[derive(Debug, Clone)]
pub struct EnvCredential {
    pub var: String,
}

impl Default for EnvCredential {
    fn default() -> Self {
        Self {
            var: DEFAULT_CREDENTIAL_VAR.to_string(),
        }
    }
}

impl CredentialSource for EnvCredential {
    fn name(&self) -> &str {
        &self.var
    }

    fn secret(&self) -> Option<String> {
        std::env::var(&self.var)
            .ok()
            .filter(|value| !value.trim().is_empty())
    }
}

/// A fixed secret, or none at all.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(pub Option<String>);

impl StaticCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Some(secret.into()))
    }

    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialSource for StaticCredential {
    fn name(&self) -> &str {
        DEFAULT_CREDENTIAL_VAR
    }

    fn secret(&self) -> Option<String> {
        self.0.clone().filter(|value| !value.trim().is_empty())
    }
}
