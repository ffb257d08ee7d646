//! Parsing of LCM URLs.
//!
//! An LCM URL has the shape `scheme://network[?opt=val&opt=val]`. What the
//! network part means is up to the provider: the UDPM provider reads it as
//! `host:port`, while the log replay provider treats it as a file path.

use std::collections::HashMap;

use error::InitError;

/// The transport named by an LCM URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// UDP multicast, the default transport.
    Udpm,
    /// Unicast UDP. Parsed, but reserved.
    Udp,
    /// The in-process queue used for testing.
    Memq,
    /// Read-only replay of an event log.
    File,
    /// The URL carried no `://` separator at all.
    NotSpecified,
}
impl Scheme {
    /// The scheme's name as it appears in a URL.
    pub fn name(&self) -> &'static str {
        match *self {
            Scheme::Udpm => "udpm",
            Scheme::Udp => "udp",
            Scheme::Memq => "memq",
            Scheme::File => "file",
            Scheme::NotSpecified => "",
        }
    }
}

/// The result of parsing a URL down to its host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParts {
    /// The transport named by the URL.
    pub scheme: Scheme,
    /// The host portion of the network string.
    pub host: String,
    /// The port, or `-1` if the URL does not name one.
    pub port: i32,
}

/// Splits an LCM URL into its scheme, network string, and options.
///
/// A URL without a `://` separator parses as `Scheme::NotSpecified` with
/// the entire input as the network string. Unknown schemes are an error.
pub fn split_lcm_url(lcm_url: &str) -> Result<(Scheme, &str, HashMap<&str, &str>), InitError> {
    // Start by splitting off the scheme.
    let (scheme, remaining) = match lcm_url.find("://") {
        Some(p) => {
            let (name, r) = lcm_url.split_at(p);
            let scheme = match name {
                "udpm" => Scheme::Udpm,
                "udp" => Scheme::Udp,
                "memq" => Scheme::Memq,
                "file" => Scheme::File,
                _ => return Err(InitError::UnknownProvider(name.into())),
            };
            (scheme, &r[3..])
        }
        None => (Scheme::NotSpecified, lcm_url),
    };

    // Then split the network string from the options.
    let (network, options) = if let Some(p) = remaining.rfind('?') {
        let (n, o) = remaining.split_at(p);
        (n, &o[1..])
    } else {
        (remaining, "")
    };

    // Now we convert the options string into a map.
    let options = match options {
        "" => HashMap::new(),
        _ => options
            .split('&')
            .map(|s| {
                if let Some(p) = s.find('=') {
                    let (k, v) = s.split_at(p);
                    Ok((k, &v[1..]))
                } else {
                    Err(InitError::InvalidLcmUrl)
                }
            })
            .collect::<Result<_, _>>()?,
    };

    Ok((scheme, network, options))
}

/// Parses a URL down to its scheme, host, and port.
///
/// The host is the substring between `://` and the first `:` or the end of
/// the network string; an empty host is invalid. The port defaults to `-1`
/// when absent, and must otherwise be a decimal integer occupying the
/// whole remainder.
pub fn parse_url(lcm_url: &str) -> Result<UrlParts, InitError> {
    let (scheme, network, _options) = split_lcm_url(lcm_url)?;
    let (host, port) = split_host_port(network)?;

    Ok(UrlParts {
        scheme,
        host: host.into(),
        port,
    })
}

/// Splits a `host[:port]` string, yielding `-1` for a missing port.
pub fn split_host_port(network: &str) -> Result<(&str, i32), InitError> {
    let (host, port) = match network.find(':') {
        Some(p) => {
            let port = network[p + 1..]
                .parse::<i32>()
                .map_err(|_| InitError::InvalidLcmUrl)?;
            (&network[..p], port)
        }
        None => (network, -1),
    };

    if host.is_empty() {
        return Err(InitError::InvalidLcmUrl);
    }

    Ok((host, port))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn full_urls() {
        let parts = parse_url("udp://sebastian:84").unwrap();
        assert_eq!(parts.scheme, Scheme::Udp);
        assert_eq!(parts.host, "sebastian");
        assert_eq!(parts.port, 84);

        let parts = parse_url("udpm://johncleese:39").unwrap();
        assert_eq!(parts.scheme, Scheme::Udpm);
        assert_eq!(parts.host, "johncleese");
        assert_eq!(parts.port, 39);
    }

    #[test]
    fn missing_port_reads_negative_one() {
        let parts = parse_url("udp://wheelofcheese").unwrap();
        assert_eq!(parts.scheme, Scheme::Udp);
        assert_eq!(parts.host, "wheelofcheese");
        assert_eq!(parts.port, -1);
    }

    #[test]
    fn missing_scheme_is_not_specified() {
        let parts = parse_url("wheelofcheese").unwrap();
        assert_eq!(parts.scheme, Scheme::NotSpecified);
        assert_eq!(parts.host, "wheelofcheese");
        assert_eq!(parts.port, -1);

        let parts = parse_url("wheelofcheese:42").unwrap();
        assert_eq!(parts.scheme, Scheme::NotSpecified);
        assert_eq!(parts.host, "wheelofcheese");
        assert_eq!(parts.port, 42);
    }

    #[test]
    fn malformed_host_and_port() {
        assert!(split_host_port("").is_err());
        assert!(split_host_port(":13").is_err());
        assert!(split_host_port(":").is_err());
        assert!(split_host_port("test:42spam").is_err());

        assert_eq!(split_host_port("test:42").unwrap(), ("test", 42));
        assert_eq!(split_host_port("foobarbaz").unwrap(), ("foobarbaz", -1));
    }

    #[test]
    fn unknown_schemes_are_rejected() {
        assert!(match parse_url("spam://ham:1") {
            Err(InitError::UnknownProvider(ref name)) => name == "spam",
            _ => false,
        });
    }

    #[test]
    fn options_are_split() {
        let (scheme, network, options) =
            split_lcm_url("udpm://239.255.76.67:7667?ttl=1&recv_buf_size=2097152").unwrap();
        assert_eq!(scheme, Scheme::Udpm);
        assert_eq!(network, "239.255.76.67:7667");
        assert_eq!(options.get("ttl"), Some(&"1"));
        assert_eq!(options.get("recv_buf_size"), Some(&"2097152"));

        assert!(split_lcm_url("udpm://1.2.3.4:5?ttl").is_err());
    }

    #[test]
    fn file_urls_keep_their_path() {
        let (scheme, network, options) = split_lcm_url("file:///var/tmp/flight.log").unwrap();
        assert_eq!(scheme, Scheme::File);
        assert_eq!(network, "/var/tmp/flight.log");
        assert!(options.is_empty());
    }
}
