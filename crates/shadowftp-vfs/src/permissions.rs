//! The rule language on top of [`crate::acl`]: a glob-matched path plus a
//! scope, compiled into per-scope rule lists ordered longest-prefix-first.

use crate::acl::{self, AclExpr, Principal};
use crate::error::{VfsError, VfsErrorKind};
use derive_more::Display;
use globset::{Glob, GlobMatcher};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

/// The closed set of permission scopes a rule can govern.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display)]
pub enum Scope {
    /// Reading file contents or listing a directory.
    #[display("download")]
    Download,
    /// Creating or overwriting a file.
    #[display("upload")]
    Upload,
    /// Renaming any path.
    #[display("rename")]
    Rename,
    /// Renaming a path this caller owns, when `rename` denies.
    #[display("renameown")]
    RenameOwn,
    /// Deleting any path.
    #[display("delete")]
    Delete,
    /// Deleting a path this caller owns, when `delete` denies.
    #[display("deleteown")]
    DeleteOwn,
    /// Resuming an upload on any path.
    #[display("resume")]
    Resume,
    /// Resuming an upload this caller owns, when `resume` denies.
    #[display("resumeown")]
    ResumeOwn,
    /// Creating a directory.
    #[display("makedir")]
    MakeDir,
    /// Viewing another user's profile.
    #[display("showuser")]
    ShowUser,
    /// Viewing a group's roster.
    #[display("showgroup")]
    ShowGroup,
    /// Whether a path's existence may be hidden from a caller.
    #[display("private")]
    Private,
}

impl FromStr for Scope {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s {
            "download" => Scope::Download,
            "upload" => Scope::Upload,
            "rename" => Scope::Rename,
            "renameown" => Scope::RenameOwn,
            "delete" => Scope::Delete,
            "deleteown" => Scope::DeleteOwn,
            "resume" => Scope::Resume,
            "resumeown" => Scope::ResumeOwn,
            "makedir" => Scope::MakeDir,
            "showuser" => Scope::ShowUser,
            "showgroup" => Scope::ShowGroup,
            "private" => Scope::Private,
            _ => return Err(()),
        })
    }
}

/// Error raised while parsing a rule line.
#[derive(Debug, Error)]
#[error("rule parse error: {kind}")]
pub struct RuleError {
    kind: RuleErrorKind,
}

impl RuleError {
    /// The stable, programmatic error kind.
    pub fn kind(&self) -> RuleErrorKind {
        self.kind
    }
}

impl From<RuleErrorKind> for RuleError {
    fn from(kind: RuleErrorKind) -> Self {
        RuleError { kind }
    }
}

/// Stable rule-parse error kinds.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum RuleErrorKind {
    /// Fewer than three whitespace-separated fields on the line.
    #[display("rule line needs at least <scope> <glob> <acl...>")]
    TooFewFields,
    /// The scope field did not match the closed enumeration.
    #[display("unknown scope")]
    UnknownScope,
    /// The glob field failed to compile.
    #[display("bad glob")]
    BadGlob,
    /// The ACL expression failed to parse; see the nested kind for detail.
    #[display("bad acl expression")]
    BadAcl,
}

/// One compiled `<scope> <path-glob> <acl…>` rule.
pub struct Rule {
    scope: Scope,
    glob_pattern: String,
    matcher: GlobMatcher,
    acl: AclExpr,
}

impl Rule {
    /// Parses a single rule line.
    pub fn parse(line: &str) -> Result<Self, RuleError> {
        let mut fields = line.split_whitespace();
        let scope_field = fields.next().ok_or(RuleErrorKind::TooFewFields)?;
        let glob_field = fields.next().ok_or(RuleErrorKind::TooFewFields)?;
        let rest: Vec<&str> = fields.collect();
        if rest.is_empty() {
            return Err(RuleErrorKind::TooFewFields.into());
        }
        let scope = Scope::from_str(scope_field).map_err(|_| RuleErrorKind::UnknownScope)?;
        let glob = Glob::new(glob_field).map_err(|_| RuleErrorKind::BadGlob)?;
        let acl = acl::parse(&rest.join(" ")).map_err(|_| RuleErrorKind::BadAcl)?;
        Ok(Rule {
            scope,
            glob_pattern: glob_field.to_string(),
            matcher: glob.compile_matcher(),
            acl,
        })
    }
}

/// A compiled set of rules, grouped by scope and sorted longest-glob-first.
#[derive(Default)]
pub struct Permissions {
    by_scope: HashMap<Scope, Vec<Rule>>,
}

impl Permissions {
    /// Groups `rules` by scope and sorts each scope's list by descending
    /// glob-pattern length, so more specific patterns are tried first.
    pub fn new(mut rules: Vec<Rule>) -> Self {
        rules.sort_by(|a, b| b.glob_pattern.len().cmp(&a.glob_pattern.len()));
        let mut by_scope: HashMap<Scope, Vec<Rule>> = HashMap::new();
        for rule in rules {
            by_scope.entry(rule.scope).or_default().push(rule);
        }
        Permissions { by_scope }
    }

    fn rules_for(&self, scope: Scope) -> &[Rule] {
        self.by_scope.get(&scope).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn first_match(&self, scope: Scope, path: &str) -> Option<&Rule> {
        let lowered = path.to_lowercase();
        self.rules_for(scope).iter().find(|r| r.matcher.is_match(&lowered))
    }

    /// `Match(scope, path, user) -> bool`. No match defaults to deny.
    /// `SUPER_USER` short-circuits to true without consulting any rule.
    pub fn matches(&self, scope: Scope, path: &str, caller: &dyn Principal) -> bool {
        if caller.name() == shadowftp_core::SUPER_USER {
            return true;
        }
        match self.first_match(scope, path) {
            Some(rule) => rule.acl.eval(caller).allow,
            None => false,
        }
    }

    /// `MatchNoDefault(scope, path, user) -> (decision, matched)`. A missing
    /// rule, or a rule that only reaches the implicit default, reports
    /// `(false, false)` — "no opinion" rather than "deny".
    pub fn matches_no_default(&self, scope: Scope, path: &str, caller: &dyn Principal) -> (bool, bool) {
        if caller.name() == shadowftp_core::SUPER_USER {
            return (true, true);
        }
        match self.first_match(scope, path) {
            Some(rule) => {
                let decision = rule.acl.eval(caller);
                (decision.allow, decision.explicit)
            }
            None => (false, false),
        }
    }

    /// The ownership-qualified form of [`Permissions::matches`]: if the
    /// global `scope` denies, fall back to `own_scope` but only when
    /// `owner` (the shadow entry's recorded owner, if any) equals the
    /// caller's name.
    pub fn matches_own(&self, scope: Scope, own_scope: Scope, path: &str, caller: &dyn Principal, owner: Option<&str>) -> bool {
        if self.matches(scope, path, caller) {
            return true;
        }
        match owner {
            Some(owner) if owner == caller.name() => self.matches(own_scope, path, caller),
            _ => false,
        }
    }
}

impl TryFrom<Vec<String>> for Permissions {
    type Error = VfsError;
    fn try_from(lines: Vec<String>) -> Result<Self, VfsError> {
        let mut rules = Vec::with_capacity(lines.len());
        for line in lines {
            let rule = Rule::parse(&line).map_err(|e| VfsError::new(VfsErrorKind::Io, e))?;
            rules.push(rule);
        }
        Ok(Permissions::new(rules))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct P {
        name: String,
    }
    impl Principal for P {
        fn name(&self) -> &str {
            &self.name
        }
        fn groups(&self) -> Box<dyn Iterator<Item = &str> + '_> {
            Box::new(std::iter::empty())
        }
        fn is_group_admin(&self, _group: &str) -> bool {
            false
        }
    }
    fn p(name: &str) -> P {
        P { name: name.to_string() }
    }

    #[test]
    fn default_deny_no_rule() {
        let perms = Permissions::new(vec![]);
        assert!(!perms.matches(Scope::Download, "/anything", &p("alice")));
    }

    #[test]
    fn longest_prefix_wins() {
        let r1 = Rule::parse("download /a/** -alice").unwrap();
        let r2 = Rule::parse("download /a/b/** !-alice").unwrap();
        let perms = Permissions::new(vec![r1, r2]);
        assert!(!perms.matches(Scope::Download, "/a/b/c", &p("alice")));
        assert!(perms.matches(Scope::Download, "/a/c", &p("alice")));
    }

    #[test]
    fn super_user_bypasses() {
        let perms = Permissions::new(vec![Rule::parse("download /** !*").unwrap()]);
        assert!(perms.matches(Scope::Download, "/x", &p(shadowftp_core::SUPER_USER)));
    }

    #[test]
    fn match_no_default_reports_no_opinion() {
        let perms = Permissions::new(vec![]);
        assert_eq!(perms.matches_no_default(Scope::Private, "/x", &p("alice")), (false, false));
        let perms = Permissions::new(vec![Rule::parse("private /staff/** !*").unwrap()]);
        assert_eq!(perms.matches_no_default(Scope::Private, "/staff/doc", &p("alice")), (false, true));
    }
}
