//! Profile and use-case handles
//!
//! Thin views over the runtime in the shape callers think in: get a
//! profile, get one of its use cases, perform it. Handles borrow the
//! runtime instead of owning it, so nothing here creates an ownership
//! cycle between executor, profile, and use case.

use serde_json::Value;

use crate::error::PerformError;
use crate::exec::{PerformOptions, UseCaseRuntime};

/// A configured profile.
#[derive(Clone, Copy)]
pub struct Profile<'r> {
    runtime: &'r UseCaseRuntime,
    id: &'r str,
}

impl std::fmt::Debug for Profile<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Profile").field("id", &self.id).finish()
    }
}

impl<'r> Profile<'r> {
    pub(crate) fn new(runtime: &'r UseCaseRuntime, id: &'r str) -> Self {
        Self { runtime, id }
    }

    pub fn id(&self) -> &str {
        self.id
    }

    /// Provider failover order of this profile.
    pub fn priority(&self) -> &'r [String] {
        self.runtime
            .config()
            .profiles
            .get(self.id)
            .map(|s| s.priority.as_slice())
            .unwrap_or(&[])
    }

    /// Handle on one named operation. The name is checked at perform time
    /// against the bound profile document.
    pub fn usecase(&self, name: &'r str) -> UseCase<'r> {
        UseCase { runtime: self.runtime, profile: self.id, name }
    }
}

/// One named operation of a profile.
#[derive(Clone, Copy)]
pub struct UseCase<'r> {
    runtime: &'r UseCaseRuntime,
    profile: &'r str,
    name: &'r str,
}

impl UseCase<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn profile_id(&self) -> &str {
        self.profile
    }

    /// Invoke this use case; equivalent to
    /// [`UseCaseRuntime::perform`] with the handle's profile and name.
    pub async fn perform(
        &self,
        input: Value,
        options: PerformOptions,
    ) -> Result<Value, PerformError> {
        self.runtime.perform(self.profile, self.name, input, options).await
    }
}
