//! Form body decoding

use crate::{Error, ParamMap};
use serde::de::DeserializeOwned;

/// Parse URL-encoded form data into a typed value
pub fn parse_form<T: DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_urlencoded::from_bytes(body)
        .map_err(|e| Error::BadRequest(format!("Failed to parse form data: {}", e)))
}

/// Parse URL-encoded form data into an ordered multi-value map
pub fn parse_form_map(body: &[u8]) -> Result<ParamMap, Error> {
    let pairs: Vec<(String, String)> = parse_form(body)?;
    Ok(pairs.into_iter().collect())
}
