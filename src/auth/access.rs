//! Access policy evaluation
//!
//! Routes may declare a set of permissions; a session is allowed through
//! only if its verified access token grants all of them.

use super::guard::login_location;
use super::route_pattern::RoutePattern;
use crate::config::AccessConfig;
use crate::metrics::ACCESS_DECISIONS_TOTAL;

/// Permission requirement attached to a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub route: RoutePattern,
    pub permissions: Vec<String>,
    /// Where sessions lacking a permission are sent
    pub redirect_url: String,
}

/// Outcome of evaluating a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny { redirect_url: String },
    /// Not signed in: go to login, then come back
    Login { location: String },
}

impl AccessDecision {
    fn label(&self) -> &'static str {
        match self {
            AccessDecision::Allow => "allow",
            AccessDecision::Deny { .. } => "deny",
            AccessDecision::Login { .. } => "login",
        }
    }
}

/// All configured access rules
#[derive(Debug, Clone, Default)]
pub struct AccessPolicy {
    rules: Vec<AccessRule>,
    login_path: String,
}

impl AccessPolicy {
    pub fn new(rules: Vec<AccessRule>, login_path: impl Into<String>) -> Self {
        Self {
            rules,
            login_path: login_path.into(),
        }
    }

    pub fn from_config(config: &AccessConfig, login_path: &str) -> Self {
        let rules = config
            .rules
            .iter()
            .map(|rule| AccessRule {
                route: RoutePattern::parse(&rule.route),
                permissions: rule.permissions.clone(),
                redirect_url: rule.redirect_url.clone(),
            })
            .collect();
        Self::new(rules, login_path)
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule whose pattern matches `path`
    pub fn rule_for(&self, path: &str) -> Option<&AccessRule> {
        self.rules.iter().find(|rule| rule.route.matches(path))
    }

    /// Decide whether a session may reach `destination`
    ///
    /// `granted` is `None` for an unauthenticated session, which is sent to
    /// login rather than to the rule's redirect.
    pub fn evaluate(
        &self,
        rule: &AccessRule,
        granted: Option<&[String]>,
        destination: &str,
    ) -> AccessDecision {
        let decision = match granted {
            None => AccessDecision::Login {
                location: login_location(&self.login_path, destination),
            },
            Some(granted) => {
                let missing = rule
                    .permissions
                    .iter()
                    .find(|required| !granted.contains(required));
                match missing {
                    None => AccessDecision::Allow,
                    Some(permission) => {
                        tracing::debug!(
                            route = rule.route.as_str(),
                            %permission,
                            "Missing permission"
                        );
                        AccessDecision::Deny {
                            redirect_url: rule.redirect_url.clone(),
                        }
                    }
                }
            }
        };

        ACCESS_DECISIONS_TOTAL
            .with_label_values(&[decision.label()])
            .inc();
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AccessRuleConfig;

    fn policy() -> AccessPolicy {
        AccessPolicy::from_config(
            &AccessConfig {
                rules: vec![
                    AccessRuleConfig {
                        route: "/admin/**".to_string(),
                        permissions: vec!["admin".to_string()],
                        redirect_url: "/denied".to_string(),
                    },
                    AccessRuleConfig {
                        route: "/reports/*".to_string(),
                        permissions: vec!["read:reports".to_string(), "export".to_string()],
                        redirect_url: "/upgrade".to_string(),
                    },
                ],
            },
            "/api/login",
        )
    }

    fn perms(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn admin_rule_denies_plain_user() {
        let policy = policy();
        let rule = policy.rule_for("/admin/users").unwrap();

        assert_eq!(
            policy.evaluate(rule, Some(&perms(&["user"])), "/admin/users"),
            AccessDecision::Deny {
                redirect_url: "/denied".to_string()
            }
        );
        assert_eq!(
            policy.evaluate(rule, Some(&perms(&["admin", "user"])), "/admin/users"),
            AccessDecision::Allow
        );
    }

    #[test]
    fn every_permission_is_required() {
        let policy = policy();
        let rule = policy.rule_for("/reports/q1").unwrap();

        assert!(matches!(
            policy.evaluate(rule, Some(&perms(&["read:reports"])), "/reports/q1"),
            AccessDecision::Deny { .. }
        ));
        assert_eq!(
            policy.evaluate(rule, Some(&perms(&["export", "read:reports"])), "/reports/q1"),
            AccessDecision::Allow
        );
    }

    #[test]
    fn unauthenticated_goes_to_login_with_destination() {
        let policy = policy();
        let rule = policy.rule_for("/admin").unwrap();

        assert_eq!(
            policy.evaluate(rule, None, "/admin?tab=users"),
            AccessDecision::Login {
                location: "/api/login?post_login_redirect_url=%2Fadmin%3Ftab%3Dusers".to_string()
            }
        );
    }

    #[test]
    fn unmatched_routes_have_no_rule() {
        let policy = policy();
        assert!(policy.rule_for("/").is_none());
        assert!(policy.rule_for("/reports").is_none());
        assert!(!policy.is_empty());
        assert!(AccessPolicy::default().is_empty());
    }
}
