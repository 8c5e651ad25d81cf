use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::LaunchError;

use super::TransportScheme;

/// Parsed `<scheme>://<authority>[?<params>]` target address.
///
/// The authority is a `host:port` pair, an interface name or a socket path
/// depending on the scheme. Parameters are `k=v` pairs joined by `&`; a key
/// without `=` gets an empty value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetAddress {
    scheme: TransportScheme,
    authority: String,
    params: BTreeMap<String, String>,
}

impl TargetAddress {
    pub fn scheme(&self) -> TransportScheme {
        self.scheme
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Parameter that must be present for the scheme to be usable.
    pub fn required_param(&self, key: &str) -> Result<&str, LaunchError> {
        self.param(key).filter(|value| !value.is_empty()).ok_or_else(|| {
            LaunchError::invalid_argument(format!(
                "{} target '{}' needs the '{key}' parameter",
                self.scheme, self
            ))
        })
    }
}

impl FromStr for TargetAddress {
    type Err = LaunchError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = input.split_once("://").ok_or_else(|| {
            LaunchError::invalid_argument(format!(
                "target '{input}' is not of the form <scheme>://<authority>"
            ))
        })?;
        let scheme: TransportScheme = scheme.parse()?;

        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        if authority.is_empty() {
            return Err(LaunchError::invalid_argument(format!(
                "target '{input}' has an empty authority"
            )));
        }

        let mut params = BTreeMap::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key.is_empty() {
                return Err(LaunchError::invalid_argument(format!(
                    "target '{input}' has a parameter without a name"
                )));
            }
            params.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            scheme,
            authority: authority.to_string(),
            params,
        })
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)?;
        for (idx, (key, value)) in self.params.iter().enumerate() {
            let sep = if idx == 0 { '?' } else { '&' };
            write!(f, "{sep}{key}={value}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_map_to_canonical_schemes() {
        let target: TargetAddress = "stream://127.0.0.1:9000".parse().unwrap();
        assert_eq!(target.scheme(), TransportScheme::Tcp);
        assert_eq!(target.authority(), "127.0.0.1:9000");
        assert_eq!(target.to_string(), "tcp://127.0.0.1:9000");

        let target: TargetAddress = "automotive-bus://can0".parse().unwrap();
        assert_eq!(target.scheme(), TransportScheme::IsoTp);
    }

    #[test]
    fn params_are_parsed() {
        let target: TargetAddress = "isotp://vcan0?src_addr=0x7e0&dst_addr=0x7e8&is_fd"
            .parse()
            .unwrap();
        assert_eq!(target.param("src_addr"), Some("0x7e0"));
        assert_eq!(target.param("dst_addr"), Some("0x7e8"));
        assert_eq!(target.param("is_fd"), Some(""));
        assert!(target.required_param("is_fd").is_err());
        assert_eq!(target.required_param("src_addr").unwrap(), "0x7e0");
    }

    #[test]
    fn malformed_targets_are_argument_errors() {
        for input in ["127.0.0.1:9000", "carrier-pigeon://coop", "tcp://", "tcp://host?=1"] {
            let err = input.parse::<TargetAddress>().unwrap_err();
            assert!(
                matches!(err, LaunchError::InvalidArgument { .. }),
                "{input}: {err:?}"
            );
        }
    }
}
