//! Caller identity, roles, and the authorization guard chain.
//!
//! Guards operate on the request-scoped [`RequestContext`] and either return
//! the resolved caller or fail with a typed [`ApiError`]. They never mutate
//! state, so a failed guard leaves no partial work behind.

use platform_api::{ApiError, ApiResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum Role {
    SystemAdmin,
    OrgAdmin,
    Coordinator,
    Staff,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::SystemAdmin => "SYSTEM_ADMIN",
            Role::OrgAdmin => "ORG_ADMIN",
            Role::Coordinator => "COORDINATOR",
            Role::Staff => "STAFF",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "SYSTEM_ADMIN" => Some(Role::SystemAdmin),
            "ORG_ADMIN" => Some(Role::OrgAdmin),
            "COORDINATOR" => Some(Role::Coordinator),
            "STAFF" => Some(Role::Staff),
            _ => None,
        }
    }
}

/// Ordered, deduplicated set of roles held by a principal.
///
/// Role lists arrive from the outside world in several shapes (a comma
/// separated column, a JSON array from an upstream identity payload). All of
/// them normalize through [`RoleSet::parse`]; labels that do not name a known
/// role are dropped rather than surfaced as errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleSet(Vec<Role>);

impl RoleSet {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut set = Vec::new();
        for role in roles {
            if !set.contains(&role) {
                set.push(role);
            }
        }
        Self(set)
    }

    /// Normalize an externally-sourced role representation.
    ///
    /// Accepts a JSON array of strings (`["ORG_ADMIN","STAFF"]`) or comma
    /// separated text (`ORG_ADMIN, STAFF`). Anything malformed yields the
    /// empty set.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::default();
        }
        if trimmed.starts_with('[') {
            let labels: Vec<String> = serde_json::from_str(trimmed).unwrap_or_default();
            return Self::new(labels.iter().filter_map(|l| Role::parse(l)));
        }
        Self::new(trimmed.split(',').filter_map(Role::parse))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    pub fn any_of(&self, roles: &[Role]) -> bool {
        roles.iter().any(|role| self.contains(*role))
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    pub fn labels(&self) -> Vec<String> {
        self.0.iter().map(|r| r.as_str().to_string()).collect()
    }
}

impl fmt::Display for RoleSet {
    /// Storage form: comma-separated labels.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.labels().join(","))
    }
}

impl FromIterator<Role> for RoleSet {
    fn from_iter<I: IntoIterator<Item = Role>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// The resolved caller identity for one request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    /// None for system administrators and not-yet-provisioned users.
    pub org_id: Option<Uuid>,
    pub email: String,
    pub roles: RoleSet,
}

impl Principal {
    /// Build a principal from a persisted user row, normalizing its stored
    /// role list on the way in.
    pub fn from_user(user: &entity::users::Model) -> Self {
        Self {
            id: user.id,
            org_id: user.org_id,
            email: user.email.clone(),
            roles: RoleSet::parse(&user.roles),
        }
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role(&self, roles: &[Role]) -> bool {
        self.roles.any_of(roles)
    }

    pub fn is_system_admin(&self) -> bool {
        self.has_role(Role::SystemAdmin)
    }
}

/// Immutable per-request identity pair.
///
/// `authenticated` is the principal that presented credentials; `acting` is
/// the principal authorization decisions run against. They differ only under
/// impersonation, which the HTTP layer grants to system administrators.
/// Audit trails (out of scope here) would record `authenticated`.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    authenticated: Option<Principal>,
    acting: Option<Principal>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_principal(principal: Principal) -> Self {
        Self {
            authenticated: Some(principal.clone()),
            acting: Some(principal),
        }
    }

    pub fn impersonating(authenticated: Principal, acting: Principal) -> Self {
        Self {
            authenticated: Some(authenticated),
            acting: Some(acting),
        }
    }

    pub fn authenticated(&self) -> Option<&Principal> {
        self.authenticated.as_ref()
    }

    pub fn acting(&self) -> Option<&Principal> {
        self.acting.as_ref()
    }

    pub fn is_impersonated(&self) -> bool {
        match (&self.authenticated, &self.acting) {
            (Some(a), Some(b)) => a.id != b.id,
            _ => false,
        }
    }
}

/// A caller confirmed to be a tenant member; `org_id` is always populated.
#[derive(Debug, Clone)]
pub struct Member {
    pub principal: Principal,
    pub org_id: Uuid,
}

pub fn require_authenticated(ctx: &RequestContext) -> ApiResult<&Principal> {
    ctx.acting().ok_or(ApiError::Unauthenticated)
}

pub fn require_system_admin(ctx: &RequestContext) -> ApiResult<&Principal> {
    let principal = require_authenticated(ctx)?;
    if principal.is_system_admin() {
        Ok(principal)
    } else {
        Err(ApiError::forbidden("system administrator role required"))
    }
}

/// System administrators live outside the tenant namespace and are rejected
/// here; tenant-scoped resolvers must not treat them as members.
pub fn require_org_member(ctx: &RequestContext) -> ApiResult<Member> {
    let principal = require_authenticated(ctx)?;
    if principal.is_system_admin() {
        return Err(ApiError::forbidden(
            "system administrators are not organization members",
        ));
    }
    let org_id = principal
        .org_id
        .ok_or_else(|| ApiError::forbidden("no organization membership"))?;
    Ok(Member {
        principal: principal.clone(),
        org_id,
    })
}

pub fn require_org_role(ctx: &RequestContext, allowed: &[Role]) -> ApiResult<Member> {
    let member = require_org_member(ctx)?;
    if member.principal.has_any_role(allowed) {
        Ok(member)
    } else {
        Err(ApiError::forbidden("insufficient role"))
    }
}

/// The tenant isolation check: binds a member to a single organization.
///
/// Runs before any organization-scoped record is returned or mutated once
/// the owning organization is known, and on every caller-supplied
/// organization id. System-administrator-only operations never reach this.
pub fn ensure_same_org(member: &Member, target: Option<Uuid>) -> ApiResult<Uuid> {
    let target = target.ok_or_else(|| ApiError::bad_input("organization id is required"))?;
    if member.org_id != target {
        return Err(ApiError::forbidden("organization mismatch"));
    }
    Ok(target)
}

/// Parse a caller-supplied organization id string. Empty input is rejected
/// as bad input before any authorization decision is made from it.
pub fn parse_org_param(raw: Option<&str>) -> ApiResult<Option<Uuid>> {
    match raw {
        None => Ok(None),
        Some(value) if value.trim().is_empty() => {
            Err(ApiError::bad_input("organization id is required"))
        }
        Some(value) => Uuid::parse_str(value.trim())
            .map(Some)
            .map_err(|_| ApiError::bad_input("invalid organization id")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(org: Option<Uuid>, roles: &[Role]) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            org_id: org,
            email: "user@example.test".into(),
            roles: RoleSet::new(roles.iter().copied()),
        }
    }

    #[test]
    fn role_set_normalizes_comma_separated_text() {
        let set = RoleSet::parse(" ORG_ADMIN , STAFF ,ORG_ADMIN");
        assert_eq!(set.labels(), vec!["ORG_ADMIN", "STAFF"]);
    }

    #[test]
    fn role_set_normalizes_json_arrays() {
        let set = RoleSet::parse(r#"["COORDINATOR","STAFF"]"#);
        assert!(set.contains(Role::Coordinator));
        assert!(set.contains(Role::Staff));
        assert!(!set.contains(Role::OrgAdmin));
    }

    #[test]
    fn malformed_role_input_yields_empty_set() {
        assert!(RoleSet::parse("").is_empty());
        assert!(RoleSet::parse("[not json").is_empty());
        assert!(RoleSet::parse("WIZARD,42").is_empty());
        assert!(RoleSet::parse(r#"[{"role":"ORG_ADMIN"}]"#).is_empty());
    }

    #[test]
    fn storage_form_round_trips() {
        let set = RoleSet::new([Role::OrgAdmin, Role::Staff]);
        assert_eq!(RoleSet::parse(&set.to_string()), set);
    }

    #[test]
    fn unauthenticated_context_fails_first() {
        let ctx = RequestContext::anonymous();
        assert!(matches!(
            require_authenticated(&ctx),
            Err(ApiError::Unauthenticated)
        ));
        assert!(matches!(
            require_system_admin(&ctx),
            Err(ApiError::Unauthenticated)
        ));
        assert!(matches!(
            require_org_member(&ctx),
            Err(ApiError::Unauthenticated)
        ));
    }

    #[test]
    fn system_admin_is_not_an_org_member() {
        let ctx = RequestContext::for_principal(principal(None, &[Role::SystemAdmin]));
        assert!(require_system_admin(&ctx).is_ok());
        assert!(matches!(
            require_org_member(&ctx),
            Err(ApiError::Forbidden(_))
        ));
    }

    #[test]
    fn org_role_guard_composes_membership_and_roles() {
        let org = Uuid::new_v4();
        let ctx = RequestContext::for_principal(principal(Some(org), &[Role::Staff]));
        assert!(require_org_member(&ctx).is_ok());
        assert!(matches!(
            require_org_role(&ctx, &[Role::OrgAdmin, Role::Coordinator]),
            Err(ApiError::Forbidden(_))
        ));
        assert!(require_org_role(&ctx, &[Role::Staff]).is_ok());
    }

    #[test]
    fn ensure_same_org_distinguishes_missing_from_mismatched() {
        let org = Uuid::new_v4();
        let ctx = RequestContext::for_principal(principal(Some(org), &[Role::OrgAdmin]));
        let member = require_org_member(&ctx).unwrap();
        assert!(matches!(
            ensure_same_org(&member, None),
            Err(ApiError::BadInput(_))
        ));
        assert!(matches!(
            ensure_same_org(&member, Some(Uuid::new_v4())),
            Err(ApiError::Forbidden(_))
        ));
        assert_eq!(ensure_same_org(&member, Some(org)).unwrap(), org);
    }

    #[test]
    fn empty_org_param_is_bad_input_not_forbidden() {
        assert!(matches!(
            parse_org_param(Some("")),
            Err(ApiError::BadInput(_))
        ));
        assert!(matches!(
            parse_org_param(Some("   ")),
            Err(ApiError::BadInput(_))
        ));
        assert!(parse_org_param(None).unwrap().is_none());
    }

    #[test]
    fn impersonation_swaps_only_the_acting_principal() {
        let admin = principal(None, &[Role::SystemAdmin]);
        let staff = principal(Some(Uuid::new_v4()), &[Role::Staff]);
        let ctx = RequestContext::impersonating(admin.clone(), staff.clone());
        assert!(ctx.is_impersonated());
        assert_eq!(ctx.authenticated().unwrap().id, admin.id);
        assert_eq!(require_authenticated(&ctx).unwrap().id, staff.id);
        // Guards see the acted-as identity, so the admin loses the bypass.
        assert!(require_system_admin(&ctx).is_err());
        assert!(require_org_member(&ctx).is_ok());
    }
}
