use anyhow::{Context, Result};
use keyring::Entry;

const KEYCHAIN_SERVICE: &str = "entcache";

/// The keychain slot holding one user's bearer token.
pub struct TokenStore {
    username: String,
    entry: Entry,
}

impl TokenStore {
    pub fn for_user(username: &str) -> Result<Self> {
        let entry = Entry::new(KEYCHAIN_SERVICE, username)
            .with_context(|| format!("Keychain unavailable for user {}", username))?;
        Ok(Self {
            username: username.to_string(),
            entry,
        })
    }

    pub fn save(&self, token: &str) -> Result<()> {
        self.entry
            .set_password(token)
            .with_context(|| format!("Could not store the token for {}", self.username))
    }

    pub fn load(&self) -> Result<String> {
        self.entry
            .get_password()
            .with_context(|| format!("No token stored for {}", self.username))
    }

    pub fn forget(&self) -> Result<()> {
        self.entry
            .delete_credential()
            .with_context(|| format!("Could not remove the token for {}", self.username))
    }
}
