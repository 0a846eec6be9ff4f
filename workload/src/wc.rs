//! A MapReduce application that counts word occurrences in lines of text.
//!
//! The map side tokenizes one line into lower-cased words and emits a
//! `(word, 1)` pair per occurrence; the reduce side sums the counts for
//! one word. Tokenization policy is carried in the auxiliary argument as
//! JSON so the engine stays agnostic of application configuration.

use std::str;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use common::{KeyValue, MapOutput, PipelineError};

/// Which characters count as word characters when splitting a line.
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenPolicy {
    /// ASCII alphanumerics plus underscore.
    #[default]
    Ascii,

    /// Any Unicode alphanumeric plus underscore.
    Unicode,
}

/// Auxiliary configuration for the word-count workload.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default)]
#[serde(default)]
pub struct WcConfig {
    pub token_policy: TokenPolicy,
}

impl WcConfig {
    /// Decode the aux argument. An empty aux means defaults.
    pub fn from_aux(aux: &[u8]) -> Result<Self> {
        if aux.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(aux).context("malformed wc aux config")
    }

    /// Encode this configuration as an aux argument.
    pub fn to_aux(&self) -> Result<Bytes> {
        let encoded = serde_json::to_vec(self).context("failed to encode wc aux config")?;
        Ok(Bytes::from(encoded))
    }
}

/// Split a line into lower-cased words: runs of non-word characters
/// separate tokens, empty tokens are dropped.
pub fn tokenize(line: &str, policy: TokenPolicy) -> Vec<String> {
    let is_word = |c: char| match policy {
        TokenPolicy::Ascii => c.is_ascii_alphanumeric() || c == '_',
        TokenPolicy::Unicode => c.is_alphanumeric() || c == '_',
    };

    line.split(|c| !is_word(c))
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

pub fn map(kv: KeyValue, aux: Bytes) -> MapOutput {
    let config = WcConfig::from_aux(&aux)?;

    let line = match str::from_utf8(&kv.value) {
        Ok(line) => line,
        Err(_) => {
            return Err(PipelineError::RecordDecode {
                key: String::from_utf8_lossy(&kv.key).into_owned(),
            }
            .into())
        }
    };

    let iter = tokenize(line, config.token_policy)
        .into_iter()
        .map(|word| {
            Ok(KeyValue {
                key: Bytes::from(word),
                value: Bytes::from_static(b"1"),
            })
        });
    Ok(Box::new(iter))
}

pub fn reduce(
    key: Bytes,
    values: Box<dyn Iterator<Item = Bytes> + '_>,
    _aux: Bytes,
) -> Result<Bytes> {
    let mut total = 0u64;

    for value in values {
        // u64 parsing also rejects negative counts.
        let count = str::from_utf8(&value)
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .ok_or_else(|| PipelineError::InvalidAggregateInput {
                key: String::from_utf8_lossy(&key).into_owned(),
                value: String::from_utf8_lossy(&value).into_owned(),
            })?;
        total += count;
    }

    Ok(Bytes::from(total.to_string()))
}
