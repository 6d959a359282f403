//! Line-oriented configuration parser: `<namespace> <key> <value…>` per line,
//! `#`-prefixed comments and blank lines ignored, `$name` substitution via
//! `var` directives.

use derive_more::Display;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("config error: {kind}")]
pub struct ConfigError {
    kind: ConfigErrorKind,
}

impl ConfigError {
    pub fn kind(&self) -> &ConfigErrorKind {
        &self.kind
    }
}

impl From<ConfigErrorKind> for ConfigError {
    fn from(kind: ConfigErrorKind) -> Self {
        ConfigError { kind }
    }
}

#[derive(Clone, Eq, PartialEq, Debug, Display)]
pub enum ConfigErrorKind {
    #[display("line {line}: unknown namespace {namespace:?}")]
    UnknownNamespace { line: usize, namespace: String },
    #[display("line {line}: too few fields")]
    TooFewFields { line: usize },
    #[display("line {line}: unknown key {key:?} in namespace {namespace:?}")]
    UnknownKey { line: usize, namespace: String, key: String },
    #[display("line {line}: bad value for {key:?}: {reason}")]
    BadValue { line: usize, key: String, reason: String },
    #[display("line {line}: reference to undefined variable ${name}")]
    UndefinedVariable { line: usize, name: String },
    #[display("acl rule error: {0}")]
    Acl(String),
}

/// Parsed, typed server configuration.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub sitename_short: String,
    pub host: String,
    pub port: u16,
    pub passive_port_min: u16,
    pub passive_port_max: u16,
    pub public_ip: Option<IpAddr>,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub fs_rootpath: PathBuf,
    pub shadow_db: PathBuf,
    pub default_user: String,
    pub default_group: String,
    pub hide_patterns: Vec<String>,
    pub auth_db: PathBuf,
    pub acl_rules: Vec<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            sitename_short: "shadowftpd".to_string(),
            host: "0.0.0.0".to_string(),
            port: 21,
            passive_port_min: 49152,
            passive_port_max: 65534,
            public_ip: None,
            tls_cert_file: None,
            tls_key_file: None,
            fs_rootpath: PathBuf::from("."),
            shadow_db: PathBuf::from("shadow.db"),
            default_user: "nobody".to_string(),
            default_group: "nogroup".to_string(),
            hide_patterns: Vec::new(),
            auth_db: PathBuf::from("shadow.db"),
            acl_rules: Vec::new(),
        }
    }
}

/// Substitutes `$name` tokens in `value` using variables defined so far.
/// Forward references (a `$name` not yet defined) are an error.
fn substitute(value: &str, vars: &HashMap<String, String>, line: usize) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_alphanumeric() || next == '_' {
                name.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if name.is_empty() {
            out.push('$');
            continue;
        }
        match vars.get(&name) {
            Some(v) => out.push_str(v),
            None => return Err(ConfigErrorKind::UndefinedVariable { line, name }.into()),
        }
    }
    Ok(out)
}

/// Parses a complete configuration file's text into [`ServerOptions`].
pub fn parse(text: &str) -> Result<ServerOptions, ConfigError> {
    let mut opts = ServerOptions::default();
    let mut vars: HashMap<String, String> = HashMap::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut fields = line.splitn(2, char::is_whitespace);
        let namespace = fields.next().unwrap_or("");
        let remainder = fields.next().unwrap_or("").trim_start();

        if namespace == "var" {
            let mut parts = remainder.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or("").trim_start_matches('$');
            let value = parts.next().unwrap_or("").trim();
            if name.is_empty() {
                return Err(ConfigErrorKind::TooFewFields { line: line_no }.into());
            }
            let resolved = substitute(value, &vars, line_no)?;
            vars.insert(name.to_string(), resolved);
            continue;
        }

        // `<namespace> <key> <value…>`: the key is the next whitespace-
        // separated field, everything after it (verbatim, including any
        // further whitespace) is the value.
        let mut parts = remainder.splitn(2, char::is_whitespace);
        let key = parts.next().unwrap_or("").to_string();
        if key.is_empty() {
            return Err(ConfigErrorKind::TooFewFields { line: line_no }.into());
        }
        let value_raw = parts.next().unwrap_or("").trim();
        let value = substitute(value_raw, &vars, line_no)?;

        match namespace {
            "server" => apply_server(&mut opts, &key, &value, line_no)?,
            "fs" => apply_fs(&mut opts, &key, &value, line_no)?,
            "auth" => {
                if key == "db" {
                    opts.auth_db = PathBuf::from(value);
                } else {
                    return Err(ConfigErrorKind::UnknownKey {
                        line: line_no,
                        namespace: namespace.to_string(),
                        key,
                    }
                    .into());
                }
            }
            "acl" => {
                let rule_line = format!("{key} {value}");
                // Validate eagerly so a malformed rule fails at config-parse
                // time rather than at first use.
                shadowftp_vfs::Rule::parse(&rule_line).map_err(|e| ConfigError::from(ConfigErrorKind::Acl(e.to_string())))?;
                opts.acl_rules.push(rule_line);
            }
            "script" => {
                // Reserved namespace: parsed, stored verbatim, never invoked.
            }
            other => {
                return Err(ConfigErrorKind::UnknownNamespace {
                    line: line_no,
                    namespace: other.to_string(),
                }
                .into());
            }
        }
    }

    Ok(opts)
}

fn apply_server(opts: &mut ServerOptions, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
    match key {
        "sitename_short" => opts.sitename_short = value.to_string(),
        "host" => opts.host = value.to_string(),
        "port" => {
            opts.port = value
                .parse()
                .map_err(|_| ConfigErrorKind::BadValue { line, key: key.to_string(), reason: "not a valid port".to_string() })?;
        }
        "passive_ports" => {
            let mut it = value.split_whitespace();
            let min: u16 = it
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ConfigErrorKind::BadValue { line, key: key.to_string(), reason: "missing MIN".to_string() })?;
            let max: u16 = it
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| ConfigErrorKind::BadValue { line, key: key.to_string(), reason: "missing MAX".to_string() })?;
            if min > max {
                return Err(ConfigErrorKind::BadValue {
                    line,
                    key: key.to_string(),
                    reason: "MIN must be <= MAX".to_string(),
                }
                .into());
            }
            opts.passive_port_min = min;
            opts.passive_port_max = max;
        }
        "public_ip" => {
            opts.public_ip = Some(
                value
                    .parse()
                    .map_err(|_| ConfigErrorKind::BadValue { line, key: key.to_string(), reason: "not a valid IP".to_string() })?,
            );
        }
        "tls_cert_file" => opts.tls_cert_file = Some(PathBuf::from(value)),
        "tls_key_file" => opts.tls_key_file = Some(PathBuf::from(value)),
        other => {
            return Err(ConfigErrorKind::UnknownKey {
                line,
                namespace: "server".to_string(),
                key: other.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

fn apply_fs(opts: &mut ServerOptions, key: &str, value: &str, line: usize) -> Result<(), ConfigError> {
    match key {
        "rootpath" => opts.fs_rootpath = PathBuf::from(value),
        "shadow_db" => opts.shadow_db = PathBuf::from(value),
        "default_user" => opts.default_user = value.to_string(),
        "default_group" => opts.default_group = value.to_string(),
        "hide" => opts.hide_patterns.push(value.to_string()),
        other => {
            return Err(ConfigErrorKind::UnknownKey {
                line,
                namespace: "fs".to_string(),
                key: other.to_string(),
            }
            .into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let text = "server port 2121\nfs rootpath /srv/ftp\n";
        let opts = parse(text).unwrap();
        assert_eq!(opts.port, 2121);
        assert_eq!(opts.fs_rootpath, PathBuf::from("/srv/ftp"));
    }

    #[test]
    fn var_substitution_resolves_before_use() {
        let text = "var $root /srv/ftp\nfs rootpath $root/data\n";
        let opts = parse(text).unwrap();
        assert_eq!(opts.fs_rootpath, PathBuf::from("/srv/ftp/data"));
    }

    #[test]
    fn forward_reference_is_an_error() {
        let text = "fs rootpath $root/data\nvar $root /srv/ftp\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let text = "# a comment\n\nserver port 21\n";
        assert_eq!(parse(text).unwrap().port, 21);
    }

    #[test]
    fn unknown_namespace_is_an_error() {
        assert!(parse("bogus key value\n").is_err());
    }

    #[test]
    fn acl_lines_accumulate_and_validate() {
        let text = "acl download /** -alice\nacl upload /incoming/** *\n";
        let opts = parse(text).unwrap();
        assert_eq!(opts.acl_rules.len(), 2);
    }

    #[test]
    fn malformed_acl_rule_is_rejected() {
        let text = "acl download /** !\n";
        assert!(parse(text).is_err());
    }

    #[test]
    fn passive_ports_range_validated() {
        assert!(parse("server passive_ports 50000 40000\n").is_err());
        let opts = parse("server passive_ports 40000 50000\n").unwrap();
        assert_eq!((opts.passive_port_min, opts.passive_port_max), (40000, 50000));
    }

    #[test]
    fn script_namespace_is_parsed_but_ignored() {
        assert!(parse("script anything goes here\n").is_ok());
    }
}
