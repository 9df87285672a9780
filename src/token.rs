//! Authentication token for Plex Media Server requests.
//!
//! Tokens are opaque strings passed to the server as the `X-Plex-Token`
//! query parameter. They can be loaded from a TOML secrets file:
//!
//! ```toml
//! token = "..."
//! ```
//!
//! Acquiring a token is outside the scope of this crate.

use std::{fmt, fs, ops::Deref, str::FromStr};

use serde::Deserialize;
use veil::Redact;

use crate::error::{Error, Result};

/// Authentication token, redacted in debug output.
#[derive(Clone, PartialEq, Eq, Hash, Redact)]
#[redact(all)]
pub struct AuthToken(String);

impl AuthToken {
    /// Secrets files larger than this are refused without being read.
    const MAX_FILE_SIZE: u64 = 1024;

    /// Loads the token from a TOML secrets file with a `token` key.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// * the file cannot be read or is larger than 1 KiB
    /// * the file is not valid TOML or has no `token` key
    /// * the token itself is invalid
    pub fn from_file(secrets_file: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Secrets {
            token: Option<String>,
        }

        let attributes = fs::metadata(secrets_file)?;
        if attributes.len() > Self::MAX_FILE_SIZE {
            return Err(Error::invalid_argument(format!(
                "{secrets_file} is too large"
            )));
        }

        let contents = fs::read_to_string(secrets_file)?;
        let secrets: Secrets = toml::from_str(&contents)?;
        match secrets.token {
            Some(token) => token.parse(),
            None => Err(Error::invalid_argument(format!(
                "{secrets_file} does not contain a token"
            ))),
        }
    }
}

impl FromStr for AuthToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim();
        if token.is_empty() {
            return Err(Error::invalid_argument("token is empty"));
        }

        if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::invalid_argument(
                "token contains whitespace or control characters",
            ));
        }

        Ok(Self(token.to_owned()))
    }
}

impl Deref for AuthToken {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Writes the token in the clear, as needed to build request URLs.
impl fmt::Display for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
