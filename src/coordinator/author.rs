//! Authorization store
//!
//! Users, roles and path-scoped privileges. Mutations arrive as
//! [`AuthorPlan`]s through the command log; listings, login and privilege
//! checks read committed state directly.

use crate::common::{Error, PartialPath, PasswordEncryptor, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Privilege codes. The numeric value is the bit position in a [`PrivilegeSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Privilege {
    SetStorageGroup = 0,
    CreateTimeseries = 1,
    InsertTimeseries = 2,
    ReadTimeseries = 3,
    DeleteTimeseries = 4,
    CreateUser = 5,
    DeleteUser = 6,
    ModifyPassword = 7,
    ListUser = 8,
    GrantUserPrivilege = 9,
    RevokeUserPrivilege = 10,
    GrantUserRole = 11,
    RevokeUserRole = 12,
    CreateRole = 13,
    DeleteRole = 14,
    ListRole = 15,
    GrantRolePrivilege = 16,
    RevokeRolePrivilege = 17,
    CreateFunction = 18,
    DropFunction = 19,
    CreateTrigger = 20,
    DropTrigger = 21,
    StartTrigger = 22,
    StopTrigger = 23,
    CreateContinuousQuery = 24,
    DropContinuousQuery = 25,
}

impl Privilege {
    pub const ALL: [Privilege; 26] = [
        Privilege::SetStorageGroup,
        Privilege::CreateTimeseries,
        Privilege::InsertTimeseries,
        Privilege::ReadTimeseries,
        Privilege::DeleteTimeseries,
        Privilege::CreateUser,
        Privilege::DeleteUser,
        Privilege::ModifyPassword,
        Privilege::ListUser,
        Privilege::GrantUserPrivilege,
        Privilege::RevokeUserPrivilege,
        Privilege::GrantUserRole,
        Privilege::RevokeUserRole,
        Privilege::CreateRole,
        Privilege::DeleteRole,
        Privilege::ListRole,
        Privilege::GrantRolePrivilege,
        Privilege::RevokeRolePrivilege,
        Privilege::CreateFunction,
        Privilege::DropFunction,
        Privilege::CreateTrigger,
        Privilege::DropTrigger,
        Privilege::StartTrigger,
        Privilege::StopTrigger,
        Privilege::CreateContinuousQuery,
        Privilege::DropContinuousQuery,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }
}

/// Bitmask of privileges; bit n is the privilege with code n
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrivilegeSet(u64);

impl PrivilegeSet {
    const KNOWN_BITS: u64 = (1u64 << Privilege::ALL.len()) - 1;

    pub fn from_mask(mask: u64) -> Result<Self> {
        let unknown = mask & !Self::KNOWN_BITS;
        if unknown != 0 {
            return Err(Error::InvalidPlan(format!(
                "unknown privilege bits {:#x}",
                unknown
            )));
        }
        Ok(Self(mask))
    }

    pub fn all() -> Self {
        Self(Self::KNOWN_BITS)
    }

    pub fn single(privilege: Privilege) -> Self {
        Self(1 << privilege.code())
    }

    pub fn mask(self) -> u64 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, privilege: Privilege) -> bool {
        self.0 & (1 << privilege.code()) != 0
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = Privilege> {
        Privilege::ALL.into_iter().filter(move |p| self.contains(*p))
    }
}

/// Privileges held on one path pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathPrivilege {
    pub path: PartialPath,
    pub privileges: Vec<Privilege>,
}

/// Author operation codes. The values are part of the wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorOperation {
    CreateUser,
    CreateRole,
    DropUser,
    DropRole,
    GrantRolePrivilege,
    GrantUserPrivilege,
    GrantRoleToUser,
    RevokeUserPrivilege,
    RevokeRolePrivilege,
    RevokeRoleFromUser,
    UpdateUser,
    ListUser,
    ListRole,
    ListUserPrivileges,
    ListRolePrivileges,
    ListUserRoles,
    ListRoleUsers,
}

impl AuthorOperation {
    pub fn from_code(code: i32) -> Result<Self> {
        use AuthorOperation::*;
        Ok(match code {
            0 => CreateUser,
            1 => CreateRole,
            2 => DropUser,
            3 => DropRole,
            4 => GrantRolePrivilege,
            5 => GrantUserPrivilege,
            6 => GrantRoleToUser,
            7 => RevokeUserPrivilege,
            8 => RevokeRolePrivilege,
            9 => RevokeRoleFromUser,
            10 => UpdateUser,
            11 => ListUser,
            12 => ListRole,
            13 => ListUserPrivileges,
            14 => ListRolePrivileges,
            15 => ListUserRoles,
            16 => ListRoleUsers,
            other => return Err(Error::InvalidAuthorOperation(other)),
        })
    }

    pub fn code(self) -> i32 {
        use AuthorOperation::*;
        match self {
            CreateUser => 0,
            CreateRole => 1,
            DropUser => 2,
            DropRole => 3,
            GrantRolePrivilege => 4,
            GrantUserPrivilege => 5,
            GrantRoleToUser => 6,
            RevokeUserPrivilege => 7,
            RevokeRolePrivilege => 8,
            RevokeRoleFromUser => 9,
            UpdateUser => 10,
            ListUser => 11,
            ListRole => 12,
            ListUserPrivileges => 13,
            ListRolePrivileges => 14,
            ListUserRoles => 15,
            ListRoleUsers => 16,
        }
    }

    /// Listing operations never go through the command log
    pub fn is_query(self) -> bool {
        self.code() >= AuthorOperation::ListUser.code()
    }
}

impl fmt::Display for AuthorOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Permission request as sent by clients
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorRequest {
    pub author_type: i32,
    pub user_name: String,
    pub role_name: String,
    pub password: String,
    pub new_password: String,
    /// Privilege bitmask
    pub permissions: u64,
    pub node_name: String,
}

/// Validated permission operation; passwords are already encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorPlan {
    pub operation: AuthorOperation,
    pub user_name: String,
    pub role_name: String,
    pub password: String,
    pub new_password: String,
    pub privileges: PrivilegeSet,
    pub path: Option<PartialPath>,
}

impl AuthorRequest {
    /// Decode and validate the request, encrypting any password it carries.
    pub fn into_plan(self, encryptor: &dyn PasswordEncryptor) -> Result<AuthorPlan> {
        let operation = AuthorOperation::from_code(self.author_type)?;
        let path = if self.node_name.trim().is_empty() {
            None
        } else {
            Some(PartialPath::parse(&self.node_name)?)
        };
        let encrypt = |p: &str| -> Result<String> {
            if p.is_empty() {
                Ok(String::new())
            } else {
                Ok(encryptor.encrypt(p)?)
            }
        };
        let plan = AuthorPlan {
            operation,
            password: encrypt(&self.password)?,
            new_password: encrypt(&self.new_password)?,
            user_name: self.user_name,
            role_name: self.role_name,
            privileges: PrivilegeSet::from_mask(self.permissions)?,
            path,
        };
        plan.validate()?;
        Ok(plan)
    }
}

impl AuthorPlan {
    /// Field presence per operation
    pub fn validate(&self) -> Result<()> {
        use AuthorOperation::*;
        let (user, role, password, new_password, privileges) = match self.operation {
            CreateUser => (true, false, true, false, false),
            DropUser | ListUserPrivileges | ListUserRoles => (true, false, false, false, false),
            CreateRole | DropRole | ListRolePrivileges | ListRoleUsers => {
                (false, true, false, false, false)
            }
            GrantUserPrivilege | RevokeUserPrivilege => (true, false, false, false, true),
            GrantRolePrivilege | RevokeRolePrivilege => (false, true, false, false, true),
            GrantRoleToUser | RevokeRoleFromUser => (true, true, false, false, false),
            UpdateUser => (true, false, false, true, false),
            ListUser | ListRole => (false, false, false, false, false),
        };
        if user {
            validate_name("user", &self.user_name)?;
        }
        if role {
            validate_name("role", &self.role_name)?;
        }
        if password && self.password.is_empty() {
            return Err(Error::InvalidPlan(format!("{} needs a password", self.operation)));
        }
        if new_password && self.new_password.is_empty() {
            return Err(Error::InvalidPlan(format!("{} needs a new password", self.operation)));
        }
        if privileges {
            if self.privileges.is_empty() {
                return Err(Error::InvalidPlan(format!("{} needs privileges", self.operation)));
            }
            if self.path.is_none() {
                return Err(Error::InvalidPlan(format!("{} needs a path", self.operation)));
            }
        }
        Ok(())
    }
}

fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidPlan(format!("{} name is empty", what)));
    }
    if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidPlan(format!("illegal {} name: {:?}", what, name)));
    }
    Ok(())
}

/// Result of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionInfo {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub privileges: Vec<PathPrivilege>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Grants(BTreeMap<PartialPath, PrivilegeSet>);

impl Grants {
    fn grant(&mut self, path: &PartialPath, set: PrivilegeSet) {
        let entry = self.0.entry(path.clone()).or_default();
        *entry = entry.union(set);
    }

    fn revoke(&mut self, path: &PartialPath, set: PrivilegeSet) {
        if let Some(held) = self.0.get_mut(path) {
            *held = held.difference(set);
            if held.is_empty() {
                self.0.remove(path);
            }
        }
    }

    fn allows(&self, path: &PartialPath, privilege: Privilege) -> bool {
        self.0
            .iter()
            .any(|(pattern, set)| set.contains(privilege) && pattern.covers(path))
    }

    fn listing(&self, filter: Option<&PartialPath>) -> Vec<PathPrivilege> {
        self.0
            .iter()
            .filter(|(path, _)| filter.map_or(true, |f| f == *path))
            .map(|(path, set)| PathPrivilege {
                path: path.clone(),
                privileges: set.iter().collect(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct User {
    password: String,
    grants: Grants,
    roles: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Role {
    grants: Grants,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorStore {
    admin: String,
    users: BTreeMap<String, User>,
    roles: BTreeMap<String, Role>,
}

impl AuthorStore {
    /// Initial state: only the admin user exists.
    pub fn new(admin: &str, admin_password: String) -> Self {
        let mut users = BTreeMap::new();
        users.insert(
            admin.to_string(),
            User {
                password: admin_password,
                grants: Grants::default(),
                roles: BTreeSet::new(),
            },
        );
        Self {
            admin: admin.to_string(),
            users,
            roles: BTreeMap::new(),
        }
    }

    pub fn admin(&self) -> &str {
        &self.admin
    }

    /// Apply a mutating operation.
    pub fn apply(&mut self, plan: &AuthorPlan) -> Result<()> {
        use AuthorOperation::*;
        match plan.operation {
            CreateUser => {
                if self.users.contains_key(&plan.user_name) {
                    return Err(Error::AlreadyExists(format!("user {}", plan.user_name)));
                }
                self.users.insert(
                    plan.user_name.clone(),
                    User {
                        password: plan.password.clone(),
                        grants: Grants::default(),
                        roles: BTreeSet::new(),
                    },
                );
            }
            CreateRole => {
                if self.roles.contains_key(&plan.role_name) {
                    return Err(Error::AlreadyExists(format!("role {}", plan.role_name)));
                }
                self.roles.insert(plan.role_name.clone(), Role::default());
            }
            DropUser => {
                if plan.user_name == self.admin {
                    return Err(Error::PermissionDenied(format!(
                        "cannot drop admin user {}",
                        self.admin
                    )));
                }
                self.users
                    .remove(&plan.user_name)
                    .ok_or_else(|| Error::NotFound(format!("user {}", plan.user_name)))?;
            }
            DropRole => {
                self.roles
                    .remove(&plan.role_name)
                    .ok_or_else(|| Error::NotFound(format!("role {}", plan.role_name)))?;
                for user in self.users.values_mut() {
                    user.roles.remove(&plan.role_name);
                }
            }
            GrantUserPrivilege => {
                let path = required_path(plan)?;
                self.user_mut(&plan.user_name)?.grants.grant(path, plan.privileges);
            }
            RevokeUserPrivilege => {
                let path = required_path(plan)?;
                self.user_mut(&plan.user_name)?.grants.revoke(path, plan.privileges);
            }
            GrantRolePrivilege => {
                let path = required_path(plan)?;
                self.role_mut(&plan.role_name)?.grants.grant(path, plan.privileges);
            }
            RevokeRolePrivilege => {
                let path = required_path(plan)?;
                self.role_mut(&plan.role_name)?.grants.revoke(path, plan.privileges);
            }
            GrantRoleToUser => {
                self.role(&plan.role_name)?;
                let role = plan.role_name.clone();
                self.user_mut(&plan.user_name)?.roles.insert(role);
            }
            RevokeRoleFromUser => {
                self.role(&plan.role_name)?;
                self.user_mut(&plan.user_name)?.roles.remove(&plan.role_name);
            }
            UpdateUser => {
                self.user_mut(&plan.user_name)?.password = plan.new_password.clone();
            }
            ListUser | ListRole | ListUserPrivileges | ListRolePrivileges | ListUserRoles
            | ListRoleUsers => {
                return Err(Error::InvalidPlan(format!(
                    "{} is a listing, not a mutation",
                    plan.operation
                )));
            }
        }
        Ok(())
    }

    /// Serve a listing operation.
    pub fn query(&self, plan: &AuthorPlan) -> Result<PermissionInfo> {
        use AuthorOperation::*;
        let mut info = PermissionInfo::default();
        match plan.operation {
            ListUser => info.users = self.users.keys().cloned().collect(),
            ListRole => info.roles = self.roles.keys().cloned().collect(),
            ListUserPrivileges => {
                let user = self.user(&plan.user_name)?;
                if plan.user_name == self.admin {
                    info.privileges = vec![PathPrivilege {
                        path: PartialPath::parse(crate::common::path::ROOT)?,
                        privileges: Privilege::ALL.to_vec(),
                    }];
                } else {
                    info.privileges = user.grants.listing(plan.path.as_ref());
                }
                info.roles = user.roles.iter().cloned().collect();
            }
            ListRolePrivileges => {
                info.privileges = self.role(&plan.role_name)?.grants.listing(plan.path.as_ref());
            }
            ListUserRoles => {
                info.roles = self.user(&plan.user_name)?.roles.iter().cloned().collect();
            }
            ListRoleUsers => {
                self.role(&plan.role_name)?;
                info.users = self
                    .users
                    .iter()
                    .filter(|(_, u)| u.roles.contains(&plan.role_name))
                    .map(|(name, _)| name.clone())
                    .collect();
            }
            CreateUser | CreateRole | DropUser | DropRole | GrantRolePrivilege
            | GrantUserPrivilege | GrantRoleToUser | RevokeUserPrivilege | RevokeRolePrivilege
            | RevokeRoleFromUser | UpdateUser => {
                return Err(Error::InvalidPlan(format!(
                    "{} is a mutation, not a listing",
                    plan.operation
                )));
            }
        }
        Ok(info)
    }

    pub fn login(
        &self,
        user_name: &str,
        password: &str,
        encryptor: &dyn PasswordEncryptor,
    ) -> Result<()> {
        match self.users.get(user_name) {
            Some(user) if encryptor.validate(password, &user.password) => Ok(()),
            _ => Err(Error::AuthenticationFailed(format!(
                "wrong user name or password for {}",
                user_name
            ))),
        }
    }

    /// Does `user_name` hold `privilege` on every path, directly or via a role?
    pub fn check_privileges(
        &self,
        user_name: &str,
        paths: &[PartialPath],
        privilege: Privilege,
    ) -> Result<()> {
        if user_name == self.admin {
            return Ok(());
        }
        let user = self.user(user_name)?;
        for path in paths {
            let allowed = user.grants.allows(path, privilege)
                || user
                    .roles
                    .iter()
                    .filter_map(|r| self.roles.get(r))
                    .any(|r| r.grants.allows(path, privilege));
            if !allowed {
                return Err(Error::PermissionDenied(format!(
                    "{} lacks {:?} on {}",
                    user_name, privilege, path
                )));
            }
        }
        Ok(())
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    fn user(&self, name: &str) -> Result<&User> {
        self.users
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("user {}", name)))
    }

    fn user_mut(&mut self, name: &str) -> Result<&mut User> {
        self.users
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("user {}", name)))
    }

    fn role(&self, name: &str) -> Result<&Role> {
        self.roles
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("role {}", name)))
    }

    fn role_mut(&mut self, name: &str) -> Result<&mut Role> {
        self.roles
            .get_mut(name)
            .ok_or_else(|| Error::NotFound(format!("role {}", name)))
    }
}

fn required_path(plan: &AuthorPlan) -> Result<&PartialPath> {
    plan.path
        .as_ref()
        .ok_or_else(|| Error::InvalidPlan(format!("{} needs a path", plan.operation)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::auth::Sha256Encryptor;

    fn store() -> AuthorStore {
        let admin_pw = Sha256Encryptor.encrypt("root").unwrap();
        AuthorStore::new("root", admin_pw)
    }

    fn plan(req: AuthorRequest) -> AuthorPlan {
        req.into_plan(&Sha256Encryptor).unwrap()
    }

    fn req(op: AuthorOperation) -> AuthorRequest {
        AuthorRequest {
            author_type: op.code(),
            ..Default::default()
        }
    }

    #[test]
    fn test_operation_codes() {
        for code in 0..17 {
            assert_eq!(AuthorOperation::from_code(code).unwrap().code(), code);
        }
        assert!(matches!(
            AuthorOperation::from_code(17),
            Err(Error::InvalidAuthorOperation(17))
        ));
        assert!(matches!(
            AuthorOperation::from_code(-1),
            Err(Error::InvalidAuthorOperation(-1))
        ));
        assert!(!AuthorOperation::UpdateUser.is_query());
        assert!(AuthorOperation::ListUser.is_query());
        assert!(AuthorOperation::ListRoleUsers.is_query());
    }

    #[test]
    fn test_privilege_mask() {
        let set = PrivilegeSet::from_mask(0b1001).unwrap();
        let held: Vec<Privilege> = set.iter().collect();
        assert_eq!(held, vec![Privilege::SetStorageGroup, Privilege::ReadTimeseries]);
        assert!(PrivilegeSet::from_mask(1 << 26).is_err());
        assert_eq!(PrivilegeSet::all().iter().count(), Privilege::ALL.len());
        for p in Privilege::ALL {
            assert_eq!(Privilege::from_code(p.code()), Some(p));
        }
    }

    #[test]
    fn test_request_validation() {
        let mut r = req(AuthorOperation::CreateUser);
        r.user_name = "tempuser".into();
        assert!(r.clone().into_plan(&Sha256Encryptor).is_err());
        r.password = "passwd".into();
        let p = plan(r);
        assert_ne!(p.password, "passwd");

        let mut r = req(AuthorOperation::GrantUserPrivilege);
        r.user_name = "tempuser".into();
        r.permissions = 1;
        assert!(r.clone().into_plan(&Sha256Encryptor).is_err());
        r.node_name = "root.ln".into();
        assert!(r.into_plan(&Sha256Encryptor).is_ok());
    }

    #[test]
    fn test_user_lifecycle() {
        let mut s = store();
        let mut r = req(AuthorOperation::CreateUser);
        r.user_name = "tempuser".into();
        r.password = "passwd".into();
        let create = plan(r);
        s.apply(&create).unwrap();
        assert!(matches!(s.apply(&create), Err(Error::AlreadyExists(_))));

        s.login("tempuser", "passwd", &Sha256Encryptor).unwrap();
        assert!(matches!(
            s.login("tempuser", "wrong", &Sha256Encryptor),
            Err(Error::AuthenticationFailed(_))
        ));

        let mut r = req(AuthorOperation::UpdateUser);
        r.user_name = "tempuser".into();
        r.new_password = "newpwd".into();
        s.apply(&plan(r)).unwrap();
        s.login("tempuser", "newpwd", &Sha256Encryptor).unwrap();

        let mut r = req(AuthorOperation::DropUser);
        r.user_name = "tempuser".into();
        let drop = plan(r);
        s.apply(&drop).unwrap();
        assert!(matches!(s.apply(&drop), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_admin_cannot_be_dropped() {
        let mut s = store();
        let mut r = req(AuthorOperation::DropUser);
        r.user_name = "root".into();
        assert!(matches!(s.apply(&plan(r)), Err(Error::PermissionDenied(_))));
        s.login("root", "root", &Sha256Encryptor).unwrap();
        s.check_privileges(
            "root",
            &[PartialPath::parse("root.any.thing").unwrap()],
            Privilege::DeleteTimeseries,
        )
        .unwrap();
    }

    #[test]
    fn test_role_privileges_and_drop_cascade() {
        let mut s = store();
        let mut r = req(AuthorOperation::CreateUser);
        r.user_name = "u1".into();
        r.password = "pw".into();
        s.apply(&plan(r)).unwrap();
        let mut r = req(AuthorOperation::CreateRole);
        r.role_name = "reader".into();
        s.apply(&plan(r)).unwrap();

        let mut r = req(AuthorOperation::GrantRolePrivilege);
        r.role_name = "reader".into();
        r.node_name = "root.ln".into();
        r.permissions = PrivilegeSet::single(Privilege::ReadTimeseries).mask();
        let grant = plan(r);
        s.apply(&grant).unwrap();
        s.apply(&grant).unwrap();

        let mut r = req(AuthorOperation::GrantRoleToUser);
        r.user_name = "u1".into();
        r.role_name = "reader".into();
        s.apply(&plan(r)).unwrap();

        let device = PartialPath::parse("root.ln.wf01.s1").unwrap();
        s.check_privileges("u1", &[device.clone()], Privilege::ReadTimeseries)
            .unwrap();
        assert!(matches!(
            s.check_privileges("u1", &[device.clone()], Privilege::InsertTimeseries),
            Err(Error::PermissionDenied(_))
        ));

        let mut r = req(AuthorOperation::ListRoleUsers);
        r.role_name = "reader".into();
        assert_eq!(s.query(&plan(r)).unwrap().users, vec!["u1".to_string()]);

        let mut r = req(AuthorOperation::DropRole);
        r.role_name = "reader".into();
        s.apply(&plan(r)).unwrap();

        let mut r = req(AuthorOperation::ListUserRoles);
        r.user_name = "u1".into();
        assert!(s.query(&plan(r)).unwrap().roles.is_empty());
        assert!(s
            .check_privileges("u1", &[device], Privilege::ReadTimeseries)
            .is_err());
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let mut s = store();
        let mut r = req(AuthorOperation::CreateUser);
        r.user_name = "u1".into();
        r.password = "pw".into();
        s.apply(&plan(r)).unwrap();

        let mut r = req(AuthorOperation::RevokeUserPrivilege);
        r.user_name = "u1".into();
        r.node_name = "root.sg".into();
        r.permissions = PrivilegeSet::single(Privilege::InsertTimeseries).mask();
        let revoke = plan(r);
        s.apply(&revoke).unwrap();
        s.apply(&revoke).unwrap();

        let mut r = req(AuthorOperation::ListUserPrivileges);
        r.user_name = "u1".into();
        assert!(s.query(&plan(r)).unwrap().privileges.is_empty());
    }

    #[test]
    fn test_kind_mismatch() {
        let mut s = store();
        assert!(matches!(
            s.apply(&plan(req(AuthorOperation::ListUser))),
            Err(Error::InvalidPlan(_))
        ));
        let mut r = req(AuthorOperation::CreateRole);
        r.role_name = "x".into();
        assert!(matches!(s.query(&plan(r)), Err(Error::InvalidPlan(_))));
        assert_eq!(
            s.query(&plan(req(AuthorOperation::ListUser))).unwrap().users,
            vec!["root".to_string()]
        );
    }
}
