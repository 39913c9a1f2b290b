/// Job row identifiers are platform-assigned UUIDs.
pub type JobId = uuid::Uuid;

/// User identifiers are platform-assigned UUIDs.
pub type UserId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
