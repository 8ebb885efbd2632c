// Written by Paul Clevett
// (C)Copyright Wolf Software Systems Ltd
// https://wolf.uk.com

//! Authentication — Linux system user authentication via crypt()
//!
//! Authenticates against /etc/shadow using the system's crypt() function.
//! WolfHost must run as root to read /etc/shadow.
//!
//! Scripts can skip the login step with a static bearer token from the
//! config file.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const SHADOW_PATH: &str = "/etc/shadow";

/// crypt() returns a pointer into one static buffer shared by all threads
static CRYPT_LOCK: Mutex<()> = Mutex::new(());

// Link against libcrypt for password verification
#[link(name = "crypt")]
unsafe extern "C" {
    fn crypt(key: *const libc::c_char, salt: *const libc::c_char) -> *mut libc::c_char;
}

/// Constant-time comparison of two secrets
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    if provided.is_empty() || expected.is_empty() {
        return false;
    }
    provided.len() == expected.len()
        && provided.as_bytes().iter().zip(expected.as_bytes().iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

/// Active session
struct Session {
    username: String,
    created: Instant,
}

/// Session manager
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    lifetime: Duration,
}

impl SessionManager {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            lifetime,
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    // A panic while holding the lock leaves the map itself intact
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Session>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a new session for a user, returns the session token
    pub fn create_session(&self, username: &str) -> String {
        let token = uuid::Uuid::new_v4().to_string();
        self.write().insert(token.clone(), Session {
            username: username.to_string(),
            created: Instant::now(),
        });
        info!("Session created for user '{}'", username);
        token
    }

    /// Validate a session token, returns the username if valid
    pub fn validate(&self, token: &str) -> Option<String> {
        self.read()
            .get(token)
            .filter(|s| s.created.elapsed() < self.lifetime)
            .map(|s| s.username.clone())
    }

    /// Destroy a session
    pub fn destroy(&self, token: &str) {
        if let Some(session) = self.write().remove(token) {
            info!("Session destroyed for user '{}'", session.username);
        }
    }

    /// Clean up expired sessions, returns how many were removed
    pub fn cleanup(&self) -> usize {
        let mut sessions = self.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.created.elapsed() < self.lifetime);
        before - sessions.len()
    }
}

/// Authenticate a user against the Linux system (/etc/shadow)
///
/// `allowed_users`, when non-empty, limits which accounts may log in.
pub fn authenticate_user(username: &str, password: &str, allowed_users: &[String]) -> bool {
    if !valid_credentials(username, password) {
        return false;
    }
    if !allowed_users.is_empty() && !allowed_users.iter().any(|u| u == username) {
        warn!("Login attempt for user '{}' not in allowed_users", username);
        return false;
    }

    // Read /etc/shadow (requires root)
    let shadow = match std::fs::read_to_string(SHADOW_PATH) {
        Ok(s) => s,
        Err(e) => {
            warn!("Cannot read {}: {}, WolfHost must run as root", SHADOW_PATH, e);
            return false;
        }
    };
    check_shadow(&shadow, username, password)
}

/// Reject empty input and names that could break out of a shadow record
fn valid_credentials(username: &str, password: &str) -> bool {
    if username.is_empty() || password.is_empty() {
        return false;
    }
    if username.contains(':') || username.contains('/') || username.contains('\0') {
        warn!("Invalid username characters in login attempt");
        return false;
    }
    true
}

/// Check a password against the matching line of shadow file content
fn check_shadow(shadow: &str, username: &str, password: &str) -> bool {
    for line in shadow.lines() {
        let parts: Vec<&str> = line.splitn(3, ':').collect();
        if parts.len() < 2 || parts[0] != username {
            continue;
        }

        let stored_hash = parts[1];

        // Locked or passwordless accounts
        if stored_hash.is_empty() || stored_hash == "*" || stored_hash.starts_with('!') {
            warn!("Login attempt for locked account '{}'", username);
            return false;
        }

        if verify_password(password, stored_hash) {
            info!("Successful login for user '{}'", username);
            return true;
        }
        warn!("Failed login attempt for user '{}'", username);
        return false;
    }

    warn!("Login attempt for unknown user '{}'", username);
    false
}

/// Hash `password` with the algorithm and salt encoded in `setting`
fn hash_password(password: &str, setting: &str) -> Option<String> {
    let c_password = std::ffi::CString::new(password).ok()?;
    let c_salt = std::ffi::CString::new(setting).ok()?;

    let _guard = CRYPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: both arguments are NUL-terminated; crypt() returns NULL or a
    // pointer to its static buffer, copied out while the lock is held.
    unsafe {
        let result = crypt(c_password.as_ptr(), c_salt.as_ptr());
        if result.is_null() {
            return None;
        }
        Some(std::ffi::CStr::from_ptr(result).to_string_lossy().into_owned())
    }
}

/// Verify a password against a stored hash using crypt()
fn verify_password(password: &str, stored_hash: &str) -> bool {
    hash_password(password, stored_hash).is_some_and(|hash| tokens_match(&hash, stored_hash))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shadow_with(user: &str, password: &str) -> String {
        let hash = hash_password(password, "$6$saltsalt$").unwrap();
        format!(
            "root:!:19700:0:99999:7:::\n\
             daemon:*:19700:0:99999:7:::\n\
             {}:{}:19700:0:99999:7:::\n\
             locked:!{}:19700:0:99999:7:::\n",
            user, hash, hash
        )
    }

    #[test]
    fn sessions_validate_and_destroy() {
        let sessions = SessionManager::new(Duration::from_secs(60));
        let token = sessions.create_session("ops");
        assert_eq!(sessions.validate(&token).as_deref(), Some("ops"));
        assert_eq!(sessions.validate("not-a-token"), None);

        sessions.destroy(&token);
        assert_eq!(sessions.validate(&token), None);
    }

    #[test]
    fn expired_sessions_are_rejected_and_purged() {
        let sessions = SessionManager::new(Duration::from_millis(20));
        let token = sessions.create_session("ops");
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(sessions.validate(&token), None);
        assert_eq!(sessions.cleanup(), 1);
        assert_eq!(sessions.cleanup(), 0);
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match("abc123", "abc123"));
        assert!(!tokens_match("abc124", "abc123"));
        assert!(!tokens_match("abc", "abc123"));
        assert!(!tokens_match("", ""));
    }

    #[test]
    fn shadow_password_check() {
        let shadow = shadow_with("ops", "correct horse");
        assert!(check_shadow(&shadow, "ops", "correct horse"));
        assert!(!check_shadow(&shadow, "ops", "wrong"));
        assert!(!check_shadow(&shadow, "nobody", "correct horse"));
        assert!(!check_shadow(&shadow, "locked", "correct horse"));
        assert!(!check_shadow(&shadow, "daemon", "anything"));
    }

    #[test]
    fn malformed_usernames_rejected() {
        assert!(!valid_credentials("", "pw"));
        assert!(!valid_credentials("ops", ""));
        assert!(!valid_credentials("ops:0", "pw"));
        assert!(!valid_credentials("../etc", "pw"));
        assert!(valid_credentials("ops", "pw"));
    }

    #[test]
    fn allowed_users_filter_runs_before_shadow() {
        let allowed = vec!["ops".to_string()];
        assert!(!authenticate_user("intruder", "pw", &allowed));
    }
}
