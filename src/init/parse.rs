// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Deserializer};
use std::error::Error;
use std::time::Duration;
use tower::BoxError;

/// Parse a single key-value pair
pub(crate) fn parse_key_val<T, U>(s: &str) -> Result<(T, U), BoxError>
where
    T: std::str::FromStr,
    T::Err: Error + Send + Sync + 'static,
    U: std::str::FromStr,
    U::Err: Error + Send + Sync + 'static,
{
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{s}`"))?;
    Ok((s[..pos].parse()?, s[pos + 1..].parse()?))
}

/// Parse a comma separated list of key-value pairs
pub(crate) fn parse_key_vals<T, U>(s: &str) -> Result<Vec<(T, U)>, BoxError>
where
    T: std::str::FromStr,
    T::Err: Error + Send + Sync + 'static,
    U: std::str::FromStr,
    U::Err: Error + Send + Sync + 'static,
{
    s.trim()
        .split(',')
        .filter(|s| !s.is_empty())
        .map(|s| parse_key_val::<T, U>(s))
        .collect::<Result<Vec<_>, _>>()
}

// Headers in a config document are either "k1=v1,k2=v2" or a list of pairs.
pub(crate) fn deserialize_key_value_pairs<'de, D>(
    deserializer: D,
) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Pairs {
        Joined(String),
        List(Vec<(String, String)>),
    }

    match Pairs::deserialize(deserializer)? {
        Pairs::Joined(s) => parse_key_vals::<String, String>(&s).map_err(serde::de::Error::custom),
        Pairs::List(l) => Ok(l),
    }
}

pub(crate) fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}
