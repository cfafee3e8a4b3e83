//! HTTP authentication challenges (RFC 2617).
//!
//! RETS servers commonly protect the login URL with HTTP Digest; a few use
//! Basic. Digest responses are computed with MD5, with `qop=auth` when the
//! server offers it.

use rets_protocol::ua_auth::md5_hex;

/// A parsed `WWW-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Challenge {
    Basic { realm: Option<String> },
    Digest(DigestChallenge),
}

/// Parameters of a Digest challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Option<String>,
    pub qop: Vec<String>,
    pub stale: bool,
}

impl DigestChallenge {
    fn supports_auth_qop(&self) -> bool {
        self.qop.iter().any(|q| q.eq_ignore_ascii_case("auth"))
    }

    fn is_session_algorithm(&self) -> bool {
        self.algorithm
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("MD5-sess"))
    }
}

/// Picks the strongest supported challenge among header values.
pub fn select_challenge<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<Challenge> {
    let mut basic = None;
    for value in values {
        match parse_challenge(value) {
            Some(Challenge::Digest(digest)) => return Some(Challenge::Digest(digest)),
            Some(challenge @ Challenge::Basic { .. }) => basic = Some(challenge),
            None => {}
        }
    }
    basic
}

/// Parses one `WWW-Authenticate` value.
pub fn parse_challenge(value: &str) -> Option<Challenge> {
    let value = value.trim();
    let (scheme, rest) = value.split_once(char::is_whitespace).unwrap_or((value, ""));
    let params = parse_params(rest);
    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };

    if scheme.eq_ignore_ascii_case("Basic") {
        return Some(Challenge::Basic {
            realm: param("realm"),
        });
    }
    if !scheme.eq_ignore_ascii_case("Digest") {
        return None;
    }

    let algorithm = param("algorithm");
    if let Some(alg) = algorithm.as_deref() {
        if !alg.eq_ignore_ascii_case("MD5") && !alg.eq_ignore_ascii_case("MD5-sess") {
            tracing::warn!("Unsupported digest algorithm {}", alg);
            return None;
        }
    }

    Some(Challenge::Digest(DigestChallenge {
        realm: param("realm").unwrap_or_default(),
        nonce: param("nonce")?,
        opaque: param("opaque"),
        algorithm,
        qop: param("qop")
            .map(|q| {
                q.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default(),
        stale: param("stale").is_some_and(|s| s.eq_ignore_ascii_case("true")),
    }))
}

/// Splits `k=v, k="quoted, value"` auth parameters.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| *c == ',' || c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' || c == ',' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if key.is_empty() && chars.peek().is_none() {
            break;
        }
        let mut value = String::new();
        if chars.peek() == Some(&'=') {
            chars.next();
            if chars.peek() == Some(&'"') {
                chars.next();
                while let Some(c) = chars.next() {
                    match c {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                value.push(escaped);
                            }
                        }
                        '"' => break,
                        other => value.push(other),
                    }
                }
            } else {
                while let Some(&c) = chars.peek() {
                    if c == ',' {
                        break;
                    }
                    value.push(c);
                    chars.next();
                }
                value = value.trim().to_string();
            }
        }
        let key = key.trim();
        if !key.is_empty() {
            params.push((key.to_string(), value));
        }
    }
    params
}

/// A Digest challenge plus the nonce count used against it.
#[derive(Debug, Clone)]
pub struct DigestState {
    challenge: DigestChallenge,
    nonce_count: u32,
}

impl DigestState {
    pub fn new(challenge: DigestChallenge) -> Self {
        Self {
            challenge,
            nonce_count: 0,
        }
    }

    pub fn challenge(&self) -> &DigestChallenge {
        &self.challenge
    }

    /// Builds the `Authorization` header value for the next request.
    pub fn authorization(
        &mut self,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        cnonce: &str,
    ) -> String {
        self.nonce_count += 1;
        let c = &self.challenge;
        let nc = format!("{:08x}", self.nonce_count);

        let mut ha1 = md5_hex(format!("{}:{}:{}", username, c.realm, password).as_bytes());
        if c.is_session_algorithm() {
            ha1 = md5_hex(format!("{}:{}:{}", ha1, c.nonce, cnonce).as_bytes());
        }
        let ha2 = md5_hex(format!("{}:{}", method, uri).as_bytes());
        let qop = c.supports_auth_qop().then_some("auth");
        let response = digest_response(&ha1, &c.nonce, &nc, cnonce, qop, &ha2);

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\"",
            quote(username),
            quote(&c.realm),
            quote(&c.nonce),
            quote(uri),
            response
        );
        if let Some(algorithm) = &c.algorithm {
            header.push_str(&format!(", algorithm={}", algorithm));
        }
        if let Some(opaque) = &c.opaque {
            header.push_str(&format!(", opaque=\"{}\"", quote(opaque)));
        }
        if let Some(qop) = qop {
            header.push_str(&format!(", qop={}, nc={}, cnonce=\"{}\"", qop, nc, quote(cnonce)));
        }
        header
    }
}

/// The request-digest: `KD(HA1, nonce:nc:cnonce:qop:HA2)` with qop, or
/// `KD(HA1, nonce:HA2)` without.
pub fn digest_response(
    ha1: &str,
    nonce: &str,
    nc: &str,
    cnonce: &str,
    qop: Option<&str>,
    ha2: &str,
) -> String {
    let input = match qop {
        Some(qop) => format!("{}:{}:{}:{}:{}:{}", ha1, nonce, nc, cnonce, qop, ha2),
        None => format!("{}:{}:{}", ha1, nonce, ha2),
    };
    md5_hex(input.as_bytes())
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
