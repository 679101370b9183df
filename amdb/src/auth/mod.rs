//! Password authentication, bearer tokens and permission checks.
//!
//! Passwords are hashed with SHA-256 and compared in constant time. Tokens
//! are `HMAC-SHA256(secret, "{username}:{issued_at}:{secret}")`, carry an
//! expiry, and can be revoked by value before that expiry elapses.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{CResult, Error};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    Delete,
    Admin,
}

impl Permission {
    /// `Admin` implies every other permission.
    fn satisfies(&self, required: Permission) -> bool {
        *self == required || *self == Permission::Admin
    }
}

struct User {
    password_hash: String,
    permissions: Vec<Permission>,
}

struct IssuedToken {
    username: String,
    issued_at: u64,
    expires_at: u64,
}

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

pub struct AuthenticationManager {
    secret: Vec<u8>,
    token_ttl: Duration,
    users: Mutex<HashMap<String, User>>,
    tokens: Mutex<HashMap<String, IssuedToken>>,
}

impl AuthenticationManager {
    pub fn new(secret: impl Into<Vec<u8>>, token_ttl: Duration) -> Self {
        AuthenticationManager {
            secret: secret.into(),
            token_ttl,
            users: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_user(&self, username: &str, password: &str, permissions: Vec<Permission>) -> CResult<()> {
        let mut users = self.users.lock().unwrap();
        if users.contains_key(username) {
            return Err(Error::InvalidArgument(format!("user already exists: {username}")));
        }
        users.insert(username.to_string(), User { password_hash: hash_password(password), permissions });
        Ok(())
    }

    pub fn has_users(&self) -> bool {
        !self.users.lock().unwrap().is_empty()
    }

    pub fn authenticate(&self, username: &str, password: &str) -> CResult<()> {
        let users = self.users.lock().unwrap();
        let user = users.get(username).ok_or(Error::PermissionDenied)?;
        if constant_time_eq(&user.password_hash, &hash_password(password)) {
            Ok(())
        } else {
            Err(Error::PermissionDenied)
        }
    }

    pub fn generate_token(&self, username: &str) -> CResult<String> {
        {
            let users = self.users.lock().unwrap();
            if !users.contains_key(username) {
                return Err(Error::PermissionDenied);
            }
        }
        let issued_at = now_unix();
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| Error::Internal(e.to_string()))?;
        mac.update(format!("{username}:{issued_at}").as_bytes());
        mac.update(&self.secret);
        let token = hex::encode(mac.finalize().into_bytes());

        self.tokens.lock().unwrap().insert(
            token.clone(),
            IssuedToken { username: username.to_string(), issued_at, expires_at: issued_at + self.token_ttl.as_secs() },
        );
        Ok(token)
    }

    /// Returns the username a still-valid token was issued to.
    pub fn verify_token(&self, token: &str) -> CResult<String> {
        let tokens = self.tokens.lock().unwrap();
        let issued = tokens.get(token).ok_or(Error::PermissionDenied)?;
        if now_unix() >= issued.expires_at {
            return Err(Error::PermissionDenied);
        }
        Ok(issued.username.clone())
    }

    pub fn revoke_token(&self, token: &str) {
        self.tokens.lock().unwrap().remove(token);
    }

    pub fn check_permission(&self, username: &str, required: Permission) -> CResult<()> {
        let users = self.users.lock().unwrap();
        let user = users.get(username).ok_or(Error::PermissionDenied)?;
        if user.permissions.iter().any(|p| p.satisfies(required)) {
            Ok(())
        } else {
            Err(Error::PermissionDenied)
        }
    }
}

/// Maps a façade operation name to the permission it requires.
pub struct AccessControl;

impl AccessControl {
    pub fn required_permission(operation: &str) -> CResult<Permission> {
        match operation {
            "get" | "read" | "query" | "scan" | "stats" => Ok(Permission::Read),
            "put" | "write" | "update" => Ok(Permission::Write),
            "delete" | "remove" => Ok(Permission::Delete),
            "register_user" | "compact" => Ok(Permission::Admin),
            other => Err(Error::InvalidArgument(format!("unknown operation: {other}"))),
        }
    }

    pub fn check_access(auth: &AuthenticationManager, username: &str, operation: &str) -> CResult<()> {
        let required = Self::required_permission(operation)?;
        auth.check_permission(username, required)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> AuthenticationManager {
        AuthenticationManager::new(b"test-secret".to_vec(), Duration::from_secs(60))
    }

    #[test]
    fn authenticate_succeeds_with_correct_password() {
        let auth = manager();
        auth.register_user("alice", "hunter2", vec![Permission::Read]).unwrap();
        assert!(auth.authenticate("alice", "hunter2").is_ok());
    }

    #[test]
    fn authenticate_fails_with_wrong_password() {
        let auth = manager();
        auth.register_user("alice", "hunter2", vec![Permission::Read]).unwrap();
        assert!(auth.authenticate("alice", "wrong").is_err());
    }

    #[test]
    fn token_round_trips_to_username() {
        let auth = manager();
        auth.register_user("alice", "hunter2", vec![Permission::Read]).unwrap();
        let token = auth.generate_token("alice").unwrap();
        assert_eq!(auth.verify_token(&token).unwrap(), "alice");
    }

    #[test]
    fn revoked_token_is_rejected() {
        let auth = manager();
        auth.register_user("alice", "hunter2", vec![Permission::Read]).unwrap();
        let token = auth.generate_token("alice").unwrap();
        auth.revoke_token(&token);
        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = AuthenticationManager::new(b"s".to_vec(), Duration::from_secs(0));
        auth.register_user("alice", "hunter2", vec![Permission::Read]).unwrap();
        let token = auth.generate_token("alice").unwrap();
        std::thread::sleep(Duration::from_millis(1100));
        assert!(auth.verify_token(&token).is_err());
    }

    #[test]
    fn admin_permission_implies_all() {
        let auth = manager();
        auth.register_user("root", "pw", vec![Permission::Admin]).unwrap();
        assert!(auth.check_permission("root", Permission::Delete).is_ok());
    }

    #[test]
    fn access_control_maps_operations() {
        let auth = manager();
        auth.register_user("alice", "pw", vec![Permission::Write]).unwrap();
        assert!(AccessControl::check_access(&auth, "alice", "put").is_ok());
        assert!(AccessControl::check_access(&auth, "alice", "delete").is_err());
    }

    #[test]
    fn access_control_accepts_operation_synonyms() {
        let auth = manager();
        auth.register_user("alice", "pw", vec![Permission::Read, Permission::Write, Permission::Delete])
            .unwrap();
        assert!(AccessControl::check_access(&auth, "alice", "read").is_ok());
        assert!(AccessControl::check_access(&auth, "alice", "query").is_ok());
        assert!(AccessControl::check_access(&auth, "alice", "write").is_ok());
        assert!(AccessControl::check_access(&auth, "alice", "update").is_ok());
        assert!(AccessControl::check_access(&auth, "alice", "remove").is_ok());
    }
}
