//! # Session Context
//!
//! The identifiers a dashboard page works with (which machine the operator is
//! standing at, which stage a shift master supervises, ...) are supplied by the
//! authentication layer. Instead of every fetcher reaching into a process-wide
//! store mid-call, they are collected once into an immutable `SessionContext`
//! and handed to whoever needs them. Fetchers capture an `Arc<SessionContext>`
//! when they are built, so a refresh always uses the values that were current
//! when the page was mounted.

use std::collections::BTreeMap;

use crate::errors::PreconditionError;

/// Parameter name for the operator's machine.
pub const MACHINE_ID: &str = "machine_id";
/// Parameter name for the production stage.
pub const STAGE_ID: &str = "stage_id";
/// Parameter name for the user's role.
pub const ROLE: &str = "role";
/// Parameter name for the user's department.
pub const DEPARTMENT: &str = "department";
/// Parameter name for the logged-in user.
pub const USER_NAME: &str = "user_name";

/// Immutable snapshot of the ambient identifiers for one session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    values: BTreeMap<String, String>,
}

impl SessionContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets (or clears, for empty strings) one parameter.
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            self.values.remove(key);
        } else {
            self.values.insert(key.to_string(), value);
        }
        self
    }

    /// Sets the machine id.
    pub fn with_machine_id(self, value: impl Into<String>) -> Self {
        self.with(MACHINE_ID, value)
    }

    /// Sets the stage id.
    pub fn with_stage_id(self, value: impl Into<String>) -> Self {
        self.with(STAGE_ID, value)
    }

    /// Sets the role.
    pub fn with_role(self, value: impl Into<String>) -> Self {
        self.with(ROLE, value)
    }

    /// Sets the department.
    pub fn with_department(self, value: impl Into<String>) -> Self {
        self.with(DEPARTMENT, value)
    }

    /// Sets the user name.
    pub fn with_user_name(self, value: impl Into<String>) -> Self {
        self.with(USER_NAME, value)
    }

    /// Raw lookup.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Lookup that fails with a `PreconditionError` naming `resource`.
    pub fn require(&self, key: &str, resource: &str) -> Result<&str, PreconditionError> {
        self.get(key)
            .ok_or_else(|| PreconditionError::missing(key, resource))
    }

    /// The operator's machine, if assigned.
    pub fn machine_id(&self) -> Option<&str> {
        self.get(MACHINE_ID)
    }

    /// The supervised stage, if any.
    pub fn stage_id(&self) -> Option<&str> {
        self.get(STAGE_ID)
    }

    /// The user's role.
    pub fn role(&self) -> Option<&str> {
        self.get(ROLE)
    }

    /// The user's department.
    pub fn department(&self) -> Option<&str> {
        self.get(DEPARTMENT)
    }

    /// The logged-in user.
    pub fn user_name(&self) -> Option<&str> {
        self.get(USER_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_reports_missing_parameter() {
        let session = SessionContext::new().with_stage_id("3");
        assert_eq!(session.require(STAGE_ID, "orders"), Ok("3"));

        let err = session.require(MACHINE_ID, "pallets").unwrap_err();
        assert_eq!(err, PreconditionError::missing("machine_id", "pallets"));
    }

    #[test]
    fn blank_values_are_treated_as_unset() {
        let session = SessionContext::new()
            .with_machine_id("M-7")
            .with_machine_id("   ");
        assert_eq!(session.machine_id(), None);
    }
}
