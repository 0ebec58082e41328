use uuid::Uuid;

/// Identity of the authenticated caller, handed explicitly to every
/// user-scoped operation instead of being recovered from a request object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserContext {
    user_id: Uuid,
}

impl UserContext {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Whether a resource owned by `owner` is visible to this caller.
    pub fn owns(&self, owner: Uuid) -> bool {
        self.user_id == owner
    }
}
