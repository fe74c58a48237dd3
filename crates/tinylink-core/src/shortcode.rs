use crate::base62;
use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

/// The public identifier of a link: the base-62 rendering of its numeric id.
///
/// A `ShortCode` always decodes to an id in `0..=i64::MAX`. Codes built from an
/// id are valid by construction; codes parsed from text are validated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShortCode {
    code: String,
    id: u64,
}

impl ShortCode {
    /// Creates the short code for a link id.
    ///
    /// # Panics
    ///
    /// Panics if `id` exceeds `i64::MAX`; backends never allocate such ids.
    pub fn from_id(id: u64) -> Self {
        assert!(id <= i64::MAX as u64, "link id {id} is out of range");
        Self {
            code: base62::encode(id),
            id,
        }
    }

    /// Parses a short code received from a caller.
    ///
    /// The text is kept as given, so `"007"` stays `"007"` while decoding to 7.
    pub fn parse(code: impl Into<String>) -> Result<Self, Error> {
        let code = code.into();
        match base62::decode(&code) {
            Ok(id) => Ok(Self { code, id }),
            Err(source) => Err(Error::InvalidCode { code, source }),
        }
    }

    /// Returns the link id this code stands for.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the short code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.code
    }

    /// Generates the full shortened URL based on the provided base URL.
    pub fn to_url(&self, base_url: &str) -> String {
        format!("{}/{}", base_url.trim_end_matches('/'), self.code)
    }
}

impl Display for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code)
    }
}

impl FromStr for ShortCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ShortCode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ShortCode> for String {
    fn from(value: ShortCode) -> Self {
        value.code
    }
}
