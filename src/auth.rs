/// Result of a camera + microphone authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    Granted,
    Denied,
    /// The platform prompt has not been answered yet; the caller may retry
    Pending,
}

/// Boundary call the session makes before acquiring any device.
///
/// The permission prompt itself is owned by the platform; this trait only
/// carries its synchronous success/failure/pending result. A `Denied` result
/// is fatal to the session attempt, `Pending` is retriable.
pub trait AuthorizationProvider: Send + Sync {
    fn request_access(&self) -> AuthorizationStatus;
}

/// Fixed-answer provider for tests and headless demo runs.
pub struct FixedAuthorization {
    status: AuthorizationStatus,
}

impl FixedAuthorization {
    pub fn granted() -> Self {
        Self {
            status: AuthorizationStatus::Granted,
        }
    }

    pub fn denied() -> Self {
        Self {
            status: AuthorizationStatus::Denied,
        }
    }

    pub fn pending() -> Self {
        Self {
            status: AuthorizationStatus::Pending,
        }
    }
}

impl AuthorizationProvider for FixedAuthorization {
    fn request_access(&self) -> AuthorizationStatus {
        self.status
    }
}
