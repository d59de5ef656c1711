//! Identity provisioning
//!
//! Signs in the staff and non-staff identities once per run. Either sign-in
//! failing aborts the run: no check in the matrix means anything without both
//! sessions.

use crate::backend::Backend;
use crate::error::{HarnessError, HarnessResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Actor class under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Elevated identity with full access to every protected table
    Staff,
    /// Self-service identity (the kiosk account)
    NonStaff,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Staff => f.write_str("staff"),
            Role::NonStaff => f.write_str("non-staff"),
        }
    }
}

/// Email/password pair for one identity
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Sign-in email
    pub email: String,
    /// Sign-in password
    pub password: String,
}

impl Credentials {
    /// Create a credential pair
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The two live sessions a run works with
#[derive(Debug)]
pub struct Sessions<S> {
    /// Staff session
    pub staff: S,
    /// Non-staff session
    pub non_staff: S,
}

impl<S> Sessions<S> {
    /// Session for `role`
    pub fn get(&self, role: Role) -> &S {
        match role {
            Role::Staff => &self.staff,
            Role::NonStaff => &self.non_staff,
        }
    }
}

/// Sign in both identities, staff first
pub async fn provision<B: Backend>(
    backend: &B,
    staff: &Credentials,
    non_staff: &Credentials,
) -> HarnessResult<Sessions<B::Session>> {
    let staff = sign_in(backend, Role::Staff, staff).await?;
    let non_staff = sign_in(backend, Role::NonStaff, non_staff).await?;
    Ok(Sessions { staff, non_staff })
}

async fn sign_in<B: Backend>(
    backend: &B,
    role: Role,
    credentials: &Credentials,
) -> HarnessResult<B::Session> {
    match backend.sign_in(credentials).await {
        Ok(session) => {
            tracing::info!("Signed in {} identity as {}", role, credentials.email);
            Ok(session)
        }
        Err(source) => {
            tracing::error!("Failed to sign in {} identity: {}", role, source);
            Err(HarnessError::authentication(role, source))
        }
    }
}
