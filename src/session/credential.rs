use secrecy::{ExposeSecret, SecretString};

/// An identity the session can authenticate as
///
/// The token is held as a [`SecretString`] so it never shows up in `Debug`
/// output or logs. An empty token is a valid value but can never be
/// activated.
#[derive(Clone, Debug)]
pub struct Credential {
    name: String,
    namespace: String,
    token: SecretString,
}

impl Credential {
    /// Credential for `name` with an empty namespace and token
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            token: SecretString::from(String::new()),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = SecretString::from(token.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace of the backing service account; empty for user credentials
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Raw bearer token
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn has_token(&self) -> bool {
        !self.token().is_empty()
    }

    pub(crate) fn secret(&self) -> SecretString {
        self.token.clone()
    }
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.namespace == other.namespace
            && self.token() == other.token()
    }
}

impl Eq for Credential {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let cred = Credential::new("node-lister")
            .with_namespace("default")
            .with_token("abc123");

        assert_eq!(cred.name(), "node-lister");
        assert_eq!(cred.namespace(), "default");
        assert_eq!(cred.token(), "abc123");
        assert!(cred.has_token());
        assert!(!Credential::new("x").has_token());
    }

    #[test]
    fn test_debug_redacts_token() {
        let cred = Credential::new("admin").with_token("super-secret-token");
        let debug = format!("{cred:?}");
        assert!(debug.contains("admin"));
        assert!(!debug.contains("super-secret-token"));
    }

    #[test]
    fn test_equality_compares_token() {
        let a = Credential::new("sa").with_token("one");
        let b = Credential::new("sa").with_token("two");
        assert_ne!(a, b);
        assert_eq!(a, a.clone().with_name("sa"));
    }
}
