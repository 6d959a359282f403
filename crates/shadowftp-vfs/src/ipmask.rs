//! Parsing and matching for `<ident-glob>@<host-glob>` IP masks. Pure and
//! network-free; the RFC 1413 Ident lookup itself lives in `shadowftp-auth`,
//! which uses [`needs_ident_lookup`] and [`host_matches`] from here.

use derive_more::Display;
use thiserror::Error;

/// Error raised while parsing an IP-mask string.
#[derive(Debug, Error)]
#[error("ip mask parse error: {kind}")]
pub struct IpMaskError {
    kind: IpMaskErrorKind,
}

impl IpMaskError {
    /// The stable, programmatic error kind.
    pub fn kind(&self) -> IpMaskErrorKind {
        self.kind
    }
}

impl From<IpMaskErrorKind> for IpMaskError {
    fn from(kind: IpMaskErrorKind) -> Self {
        IpMaskError { kind }
    }
}

/// Stable IP-mask parse error kinds.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum IpMaskErrorKind {
    /// No `@` separator found.
    #[display("missing '@' separator")]
    MissingSeparator,
    /// The host part did not have exactly four dot-separated components.
    #[display("host must have four dot-separated components")]
    WrongComponentCount,
}

/// A parsed `<ident-glob>@<host-glob>` mask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMask {
    /// The ident half, verbatim (e.g. `*` or a literal username).
    pub ident_glob: String,
    /// The four dot-separated host glob components.
    pub host_components: [String; 4],
}

/// Parses and validates the structural shape of an IP mask.
pub fn parse(mask: &str) -> Result<ParsedMask, IpMaskError> {
    let (ident, host) = mask.split_once('@').ok_or(IpMaskErrorKind::MissingSeparator)?;
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() != 4 {
        return Err(IpMaskErrorKind::WrongComponentCount.into());
    }
    let host_components = [parts[0].to_string(), parts[1].to_string(), parts[2].to_string(), parts[3].to_string()];
    Ok(ParsedMask {
        ident_glob: ident.to_string(),
        host_components,
    })
}

/// True when this mask's ident part is the wildcard `*`, meaning no Ident
/// lookup is required — the host glob alone decides the match.
pub fn needs_ident_lookup(mask: &ParsedMask) -> bool {
    mask.ident_glob != "*"
}

/// Matches one dot-separated component against a pattern where `*` stands
/// for "zero or more characters within this component" — it never spans a
/// `.` boundary, matching the spec's "not across components" rule.
fn component_matches(pattern: &str, value: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == value,
        Some((prefix, suffix)) => {
            if pattern.matches('*').count() > 1 {
                // Multiple wildcards within one component: fall back to a
                // simple recursive glob since the no-cross-component rule
                // only forbids a '*' spanning a '.', not repeated '*'s.
                return glob_single_segment(pattern, value);
            }
            value.len() >= prefix.len() + suffix.len() && value.starts_with(prefix) && value.ends_with(suffix)
        }
    }
}

fn glob_single_segment(pattern: &str, value: &str) -> bool {
    // Minimal '*'-only glob matcher scoped to a single (non-'.') segment.
    let mut p_idx = 0usize;
    let mut v_idx = 0usize;
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    let mut star_p: Option<usize> = None;
    let mut star_v = 0usize;
    while v_idx < v.len() {
        if p_idx < p.len() && (p[p_idx] == v[v_idx]) {
            p_idx += 1;
            v_idx += 1;
        } else if p_idx < p.len() && p[p_idx] == '*' {
            star_p = Some(p_idx);
            star_v = v_idx;
            p_idx += 1;
        } else if let Some(sp) = star_p {
            p_idx = sp + 1;
            star_v += 1;
            v_idx = star_v;
        } else {
            return false;
        }
    }
    while p_idx < p.len() && p[p_idx] == '*' {
        p_idx += 1;
    }
    p_idx == p.len()
}

/// Matches a dotted-quad (or dotted hostname) `host` against the mask's
/// four host-glob components; component counts must match exactly.
pub fn host_matches(mask: &ParsedMask, host: &str) -> bool {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    mask.host_components
        .iter()
        .zip(parts.iter())
        .all(|(pattern, value)| component_matches(pattern, value))
}

/// Matches the ident part of the mask against an ident string obtained via
/// RFC 1413 lookup (or skips straight to true when the mask's ident is `*`).
pub fn ident_matches(mask: &ParsedMask, ident: &str) -> bool {
    if mask.ident_glob == "*" {
        return true;
    }
    glob_single_segment(&mask.ident_glob, ident)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requires_four_components() {
        assert!(parse("*@1.2.3").is_err());
        assert!(parse("*@1.2.3.4").is_ok());
    }

    #[test]
    fn wildcard_ident_skips_lookup() {
        let mask = parse("*@1.2.3.4").unwrap();
        assert!(!needs_ident_lookup(&mask));
        let mask = parse("bob@1.2.3.4").unwrap();
        assert!(needs_ident_lookup(&mask));
    }

    #[test]
    fn host_component_wildcard() {
        let mask = parse("*@1.2.3.*").unwrap();
        assert!(host_matches(&mask, "1.2.3.4"));
        assert!(!host_matches(&mask, "1.2.4.4"));
    }

    #[test]
    fn wildcard_does_not_cross_components() {
        let mask = parse("*@1.2.*.4").unwrap();
        assert!(host_matches(&mask, "1.2.99.4"));
        assert!(!host_matches(&mask, "1.2.99.99.4"));
    }
}
