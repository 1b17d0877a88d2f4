use secrecy::{ExposeSecret, SecretBox, SecretString};

pub struct SecretBytes {
    inner: SecretBox<Vec<u8>>,
}

impl SecretBytes {
    pub fn new(data: &[u8]) -> Self {
        Self { inner: SecretBox::new(Box::new(data.to_vec())) }
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { inner: SecretBox::new(Box::new(data)) }
    }

    pub fn expose_secret(&self) -> &[u8] {
        self.inner.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.inner.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.expose_secret().is_empty()
    }
}

impl Clone for SecretBytes {
    fn clone(&self) -> Self {
        Self::new(self.expose_secret())
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes([... {} bytes ...])", self.len())
    }
}

/// A user password. Its length is counted in bytes.
pub struct Password {
    inner: SecretString,
}

impl Password {
    pub fn new(password: &str) -> Self {
        Self { inner: SecretString::from(password.to_owned()) }
    }

    pub fn from_string(password: String) -> Self {
        Self { inner: SecretString::from(password) }
    }

    pub fn expose_secret(&self) -> &str {
        self.inner.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.expose_secret().is_empty()
    }

    /// Copies the password into key material for the deriver thread.
    pub fn to_bytes(&self) -> SecretBytes {
        SecretBytes::new(self.expose_secret().as_bytes())
    }
}

impl From<SecretString> for Password {
    fn from(secret: SecretString) -> Self {
        Self { inner: secret }
    }
}

impl std::fmt::Debug for Password {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Password([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_contents() {
        let password = Password::new("testing123456");
        assert_eq!(format!("{password:?}"), "Password([REDACTED])");
        let bytes = SecretBytes::new(b"abc");
        assert_eq!(format!("{bytes:?}"), "SecretBytes([... 3 bytes ...])");
    }

    #[test]
    fn test_password_bytes() {
        let password = Password::new("héllo");
        assert_eq!(password.len(), 6);
        assert_eq!(password.to_bytes().expose_secret(), "héllo".as_bytes());
    }
}
