//! Read methods: byte filters applied while reading the data source (server) or the socket
//! (client).
//!
//! A method is written as its name followed by `;`-separated `key=value` (or `key:value`)
//! parameters, e.g. `raw`, `linspace;step=4` or `match;pattern=[0-9]`.

use crate::error_handling::types::ConfigError;
use log::info;
use regex::bytes::Regex;
use std::collections::HashMap;
use std::str::FromStr;

pub const METHOD_NAMES: [&str; 3] = ["raw", "linspace", "match"];

/// A byte filter fed with consecutive chunks of one stream.
pub trait ReadMethod: Send {
    fn name(&self) -> &'static str;

    /// Appends the bytes of `input` that pass the filter to `out`.
    fn apply(&mut self, input: &[u8], out: &mut Vec<u8>);
}

/// Read the data without any filtering.
#[derive(Debug, Default)]
pub struct Raw;

impl ReadMethod for Raw {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn apply(&mut self, input: &[u8], out: &mut Vec<u8>) {
        out.extend_from_slice(input);
    }
}

/// Keep evenly spaced bytes: the first byte of the stream, then every `step`-th one. The
/// position carries over between chunks.
#[derive(Debug)]
pub struct Linspace {
    step: usize,
    /// Index of the next byte within the current step window.
    phase: usize,
}

impl Linspace {
    pub fn new(step: usize) -> Self {
        Self { step, phase: 0 }
    }
}

impl ReadMethod for Linspace {
    fn name(&self) -> &'static str {
        "linspace"
    }

    fn apply(&mut self, input: &[u8], out: &mut Vec<u8>) {
        let first = (self.step - self.phase) % self.step;
        out.extend(input.iter().skip(first).step_by(self.step));
        self.phase = (self.phase + input.len()) % self.step;
    }
}

/// Keep the bytes covered by the non-overlapping matches of a byte regex. Matches do not span
/// chunk boundaries.
#[derive(Debug)]
pub struct Match {
    pattern: Regex,
}

impl Match {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }
}

impl ReadMethod for Match {
    fn name(&self) -> &'static str {
        "match"
    }

    fn apply(&mut self, input: &[u8], out: &mut Vec<u8>) {
        for m in self.pattern.find_iter(input) {
            out.extend_from_slice(m.as_bytes());
        }
    }
}

/// Parsed form of a `--method` value. Build a fresh [`ReadMethod`] per session with
/// [`MethodSpec::build`], since methods carry per-stream state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodSpec {
    Raw,
    Linspace { step: usize },
    Match { pattern: String },
}

impl MethodSpec {
    pub fn build(&self) -> Result<Box<dyn ReadMethod>, ConfigError> {
        Ok(match self {
            MethodSpec::Raw => Box::new(Raw),
            MethodSpec::Linspace { step } => Box::new(Linspace::new(*step)),
            MethodSpec::Match { pattern } => {
                let regex = Regex::new(pattern).map_err(|e| {
                    ConfigError::InvalidMethod(format!("bad pattern {:?}: {}", pattern, e))
                })?;
                Box::new(Match::new(regex))
            }
        })
    }
}

fn take_param(
    params: &mut HashMap<String, String>,
    method: &str,
    key: &str,
) -> Result<String, ConfigError> {
    params.remove(key).ok_or_else(|| {
        ConfigError::InvalidMethod(format!("method {:?} requires parameter {:?}", method, key))
    })
}

impl FromStr for MethodSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';').map(str::trim).filter(|p| !p.is_empty());
        let name = parts
            .next()
            .ok_or_else(|| ConfigError::InvalidMethod("empty method".into()))?
            .to_ascii_lowercase();

        let mut params = HashMap::new();
        for item in parts {
            let (key, value) = item
                .split_once(|c: char| c == '=' || c == ':')
                .ok_or_else(|| {
                    ConfigError::InvalidMethod(format!("invalid method argument {:?}", item))
                })?;
            params.insert(key.trim().to_string(), value.trim().to_string());
        }

        let spec = match name.as_str() {
            "raw" => MethodSpec::Raw,
            "linspace" => {
                let raw_step = take_param(&mut params, &name, "step")?;
                let step: usize = raw_step.parse().map_err(|_| {
                    ConfigError::InvalidMethod(format!("step {:?} is not a number", raw_step))
                })?;
                if step < 1 {
                    return Err(ConfigError::InvalidMethod(
                        "parameter 'step' must be >= 1".into(),
                    ));
                }
                MethodSpec::Linspace { step }
            }
            "match" => MethodSpec::Match {
                pattern: take_param(&mut params, &name, "pattern")?,
            },
            other => {
                return Err(ConfigError::InvalidMethod(format!(
                    "unknown method {:?}, expected one of {:?}",
                    other, METHOD_NAMES
                )))
            }
        };

        if let Some(key) = params.keys().next() {
            return Err(ConfigError::InvalidMethod(format!(
                "method {:?} has no parameter {:?}",
                name, key
            )));
        }

        info!("[method: {:?}]", spec);
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(method: &mut dyn ReadMethod, chunks: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for chunk in chunks {
            method.apply(chunk, &mut out);
        }
        out
    }

    #[test]
    fn test_parse_methods() {
        assert_eq!("raw".parse::<MethodSpec>().unwrap(), MethodSpec::Raw);
        assert_eq!(
            "linspace;step=3".parse::<MethodSpec>().unwrap(),
            MethodSpec::Linspace { step: 3 }
        );
        assert_eq!(
            "LINSPACE; step:7".parse::<MethodSpec>().unwrap(),
            MethodSpec::Linspace { step: 7 }
        );
        assert_eq!(
            "match;pattern=[0-9]+".parse::<MethodSpec>().unwrap(),
            MethodSpec::Match {
                pattern: "[0-9]+".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_bad_methods() {
        for bad in [
            "",
            "zip",
            "linspace",
            "linspace;step=0",
            "linspace;step=abc",
            "linspace;step",
            "raw;extra=1",
            "match",
        ] {
            assert!(
                matches!(bad.parse::<MethodSpec>(), Err(ConfigError::InvalidMethod(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_bad_regex_fails_at_build() {
        let spec = "match;pattern=[0-9".parse::<MethodSpec>().unwrap();
        assert!(matches!(spec.build(), Err(ConfigError::InvalidMethod(_))));
    }

    #[test]
    fn test_raw_passes_everything() {
        let mut raw = Raw;
        assert_eq!(run(&mut raw, &[&b"abc"[..], &b""[..], &b"de"[..]]), b"abcde");
    }

    #[test]
    fn test_linspace_keeps_every_step_across_chunks() {
        let data: Vec<u8> = (0u8..20).collect();
        let expected: Vec<u8> = (0u8..20).step_by(3).collect();

        let mut whole = Linspace::new(3);
        assert_eq!(run(&mut whole, &[&data[..]]), expected);

        let mut split = Linspace::new(3);
        assert_eq!(
            run(&mut split, &[&data[..1], &data[1..5], &data[5..6], &data[6..]]),
            expected
        );

        let mut step_one = Linspace::new(1);
        assert_eq!(run(&mut step_one, &[&data[..7], &data[7..]]), data);
    }

    #[test]
    fn test_match_keeps_matching_bytes() {
        let mut digits = "match;pattern=[0-9]".parse::<MethodSpec>().unwrap().build().unwrap();
        assert_eq!(digits.name(), "match");
        assert_eq!(run(digits.as_mut(), &[&b"a1b22"[..], &b"c333d"[..]]), b"122333");

        let mut none = "match;pattern=z".parse::<MethodSpec>().unwrap().build().unwrap();
        assert!(run(none.as_mut(), &[&b"abc"[..]]).is_empty());
    }
}
