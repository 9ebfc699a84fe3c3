//! The user's session cookies.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use thiserror::Error;

static USER_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("static pattern is valid"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("The cookie string is empty")]
    Empty,
    #[error("Malformed cookie segment: {0:?}")]
    Malformed(String),
    #[error("DedeUserID is missing from the cookies, log in and copy them again")]
    MissingUserId,
    #[error("DedeUserID {0:?} is not a valid user id")]
    InvalidUserId(String),
}

/// Parsed cookies of a logged-in session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    raw: String,
    cookies: BTreeMap<String, String>,
}

impl Credentials {
    /// Parses a `name=value; name=value` cookie header.
    ///
    /// # Errors
    ///
    /// Fails when a segment has no `=`, or when `DedeUserID` is missing or not
    /// numeric.
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CredentialError::Empty);
        }

        let mut cookies = BTreeMap::new();
        for segment in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| CredentialError::Malformed(segment.to_string()))?;

            let name = name.trim();
            if name.is_empty() {
                return Err(CredentialError::Malformed(segment.to_string()));
            }
            cookies.insert(name.to_string(), value.trim().trim_matches('"').to_string());
        }

        let user_id = cookies
            .get("DedeUserID")
            .ok_or(CredentialError::MissingUserId)?;
        if !USER_ID.is_match(user_id) {
            return Err(CredentialError::InvalidUserId(user_id.clone()));
        }

        Ok(Self {
            raw: raw.to_string(),
            cookies,
        })
    }

    /// The numeric id of the logged-in user.
    pub fn user_id(&self) -> &str {
        self.cookies
            .get("DedeUserID")
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// The cookie header as it was given.
    pub fn header(&self) -> &str {
        &self.raw
    }
}
