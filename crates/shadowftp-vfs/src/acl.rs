//! The glftpd-style ACL expression language: a whitespace-separated list of
//! allow/deny tokens that compiles into a decision predicate over a caller
//! and, optionally, a target user or group.

use derive_more::Display;
use std::collections::HashSet;
use thiserror::Error;

/// Anything an ACL expression can be evaluated against: a name plus the
/// groups it belongs to. Implemented by `shadowftp_core::User` so the
/// resolver never has to know about the concrete user type.
pub trait Principal {
    /// Lowercase name of this principal.
    fn name(&self) -> &str;
    /// Lowercase names of every group this principal belongs to.
    fn groups(&self) -> Box<dyn Iterator<Item = &str> + '_>;
    /// True if this principal administers `group`.
    fn is_group_admin(&self, group: &str) -> bool;
}

impl Principal for shadowftp_core::User {
    fn name(&self) -> &str {
        &self.name
    }
    fn groups(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        Box::new(self.group_names())
    }
    fn is_group_admin(&self, group: &str) -> bool {
        shadowftp_core::User::is_group_admin(self, group)
    }
}

/// A group as a rename/gadmin target: just its name and membership, which is
/// all `MatchTargetGroup` needs.
pub trait GroupTarget {
    /// Lowercase group name.
    fn name(&self) -> &str;
}

impl GroupTarget for shadowftp_core::Group {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Error raised while parsing an ACL expression.
#[derive(Debug, Error)]
#[error("acl parse error: {kind}")]
pub struct AclError {
    kind: AclErrorKind,
}

impl AclError {
    /// The stable, programmatic error kind.
    pub fn kind(&self) -> AclErrorKind {
        self.kind
    }
}

impl From<AclErrorKind> for AclError {
    fn from(kind: AclErrorKind) -> Self {
        AclError { kind }
    }
}

/// Stable ACL parse error kinds.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Display)]
pub enum AclErrorKind {
    /// The expression had no tokens at all.
    #[display("empty acl expression")]
    Empty,
    /// A token didn't match any recognized grammar production.
    #[display("malformed acl token")]
    Malformed,
    /// A `-name`/`=name` token's name failed `[a-zA-Z0-9]+` or was empty/`*`.
    #[display("invalid user or group name")]
    InvalidName,
}

/// One side (allowed or blocked) of a parsed ACL expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclSet {
    users: HashSet<String>,
    groups: HashSet<String>,
    catch_all: bool,
    self_match: bool,
    gadmin: bool,
}

/// A parsed, ready-to-evaluate ACL expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclExpr {
    allowed: AclSet,
    blocked: AclSet,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name != "*" && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Parses a whitespace-separated, lowercase-normalized ACL expression.
/// Returns on the first malformed token, per the spec's "parser returns on
/// first failure" rule.
pub fn parse(input: &str) -> Result<AclExpr, AclError> {
    let lowered = input.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(AclErrorKind::Empty.into());
    }

    let mut expr = AclExpr::default();
    for raw in tokens {
        let (blocked, body) = match raw.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };
        if body.is_empty() {
            return Err(AclErrorKind::Malformed.into());
        }

        let set = if blocked { &mut expr.blocked } else { &mut expr.allowed };

        match body {
            "*" => set.catch_all = true,
            "self" => set.self_match = true,
            "gadmin" => set.gadmin = true,
            _ => {
                let mut chars = body.chars();
                let prefix = chars.next().unwrap();
                let name: String = chars.collect();
                match prefix {
                    '-' => {
                        if !valid_name(&name) {
                            return Err(AclErrorKind::InvalidName.into());
                        }
                        set.users.insert(name);
                    }
                    '=' => {
                        if !valid_name(&name) {
                            return Err(AclErrorKind::InvalidName.into());
                        }
                        set.groups.insert(name);
                    }
                    _ => return Err(AclErrorKind::Malformed.into()),
                }
            }
        }
    }

    Ok(expr)
}

/// The outcome of evaluating an ACL expression: whether it allows the
/// action, and whether that answer came from an explicit rule (as opposed
/// to falling through to the default-deny).
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct Decision {
    /// Whether the action is allowed.
    pub allow: bool,
    /// Whether a rule explicitly produced `allow`, vs. the implicit default.
    pub explicit: bool,
}

impl Decision {
    const fn explicit(allow: bool) -> Self {
        Decision { allow, explicit: true }
    }
    const fn default_deny() -> Self {
        Decision { allow: false, explicit: false }
    }
}

impl AclExpr {
    /// Evaluates the expression against `caller` alone (no target).
    pub fn eval(&self, caller: &dyn Principal) -> Decision {
        if self.blocked.users.contains(caller.name()) {
            return Decision::explicit(false);
        }
        if caller.groups().any(|g| self.blocked.groups.contains(g)) {
            return Decision::explicit(false);
        }
        if self.allowed.users.contains(caller.name()) {
            return Decision::explicit(true);
        }
        if caller.groups().any(|g| self.allowed.groups.contains(g)) {
            return Decision::explicit(true);
        }
        if self.blocked.catch_all {
            return Decision::explicit(false);
        }
        if self.allowed.catch_all {
            return Decision::explicit(true);
        }
        Decision::default_deny()
    }

    /// Evaluates against `caller` with a user `target`, applying the `self`
    /// and `gadmin` predicates before falling back to [`AclExpr::eval`].
    pub fn eval_target(&self, caller: &dyn Principal, target: &dyn Principal) -> Decision {
        if self.allowed.self_match && caller.name() == target.name() {
            return Decision::explicit(true);
        }
        if self.blocked.self_match && caller.name() == target.name() {
            return Decision::explicit(false);
        }
        if self.allowed.gadmin || self.blocked.gadmin {
            let mut blocked_hit = false;
            let mut allowed_hit = false;
            for group in target.groups() {
                if caller.is_group_admin(group) {
                    if self.blocked.gadmin {
                        blocked_hit = true;
                    }
                    if self.allowed.gadmin {
                        allowed_hit = true;
                    }
                }
            }
            // allowed wins on tie, per spec.
            if allowed_hit {
                return Decision::explicit(true);
            }
            if blocked_hit {
                return Decision::explicit(false);
            }
        }
        self.eval(caller)
    }

    /// Evaluates against `caller` with a group `target`, the `gadmin`-only
    /// analogue of [`AclExpr::eval_target`].
    pub fn eval_target_group(&self, caller: &dyn Principal, target: &dyn GroupTarget) -> Decision {
        if self.allowed.gadmin || self.blocked.gadmin {
            let is_admin = caller.is_group_admin(target.name());
            if is_admin && self.allowed.gadmin {
                return Decision::explicit(true);
            }
            if is_admin && self.blocked.gadmin {
                return Decision::explicit(false);
            }
        }
        self.eval(caller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestPrincipal {
        name: String,
        groups: Vec<String>,
        admin_of: Vec<String>,
    }

    impl Principal for TestPrincipal {
        fn name(&self) -> &str {
            &self.name
        }
        fn groups(&self) -> Box<dyn Iterator<Item = &str> + '_> {
            Box::new(self.groups.iter().map(|s| s.as_str()))
        }
        fn is_group_admin(&self, group: &str) -> bool {
            self.admin_of.iter().any(|g| g == group)
        }
    }

    fn principal(name: &str, groups: &[&str]) -> TestPrincipal {
        TestPrincipal {
            name: name.to_string(),
            groups: groups.iter().map(|s| s.to_string()).collect(),
            admin_of: Vec::new(),
        }
    }

    #[test]
    fn empty_is_error() {
        assert_eq!(parse("").unwrap_err().kind(), AclErrorKind::Empty);
        assert_eq!(parse("   ").unwrap_err().kind(), AclErrorKind::Empty);
    }

    #[test]
    fn lone_modifiers_are_errors() {
        assert!(parse("!").is_err());
        assert!(parse("-").is_err());
        assert!(parse("=").is_err());
    }

    #[test]
    fn default_deny_with_no_match() {
        let acl = parse("-alice").unwrap();
        let bob = principal("bob", &[]);
        let decision = acl.eval(&bob);
        assert!(!decision.allow);
        assert!(!decision.explicit);
    }

    #[test]
    fn catch_all_allows() {
        let acl = parse("*").unwrap();
        let bob = principal("bob", &[]);
        let decision = acl.eval(&bob);
        assert!(decision.allow);
        assert!(decision.explicit);
    }

    #[test]
    fn explicit_deny_beats_catch_all() {
        let acl = parse("!-eve *").unwrap();
        let eve = principal("eve", &[]);
        let decision = acl.eval(&eve);
        assert!(!decision.allow);
        assert!(decision.explicit);
    }

    #[test]
    fn group_deny_beats_user_allow_order() {
        // Blocked groups are checked before allowed users, per the evaluation order.
        let acl = parse("!=staff -alice").unwrap();
        let alice = principal("alice", &["staff"]);
        let decision = acl.eval(&alice);
        assert!(!decision.allow);
        assert!(decision.explicit);
    }

    #[test]
    fn self_predicate() {
        let acl = parse("self").unwrap();
        let alice = principal("alice", &[]);
        let target = principal("alice", &[]);
        assert!(acl.eval_target(&alice, &target).allow);

        let bob = principal("bob", &[]);
        let decision = acl.eval_target(&bob, &target);
        assert!(!decision.allow);
        assert!(!decision.explicit);
    }
}
