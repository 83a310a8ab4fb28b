/// Database row types, one per table.
/// Distinct from portal-types API models to keep the DB layer independent.

pub struct SshKeyRow {
    pub id: i64,
    pub uid: u64,
    pub name: String,
    pub key: String,
}

pub struct MessageRow {
    pub id: i64,
    pub body: String,
    pub author: String,
    pub created_at: String,
}

pub struct NotificationRow {
    pub id: i64,
    pub body: String,
    /// RFC 3339, written by the application.
    pub created_at: String,
}
