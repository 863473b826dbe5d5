//! Represents an uploaded file and its lifetime.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A catalog record for one uploaded file.
///
/// The record carries metadata only. The content lives on disk at
/// `<upload_dir>/<name>`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq, Eq)]
pub struct StoredObject {
    /// Row id assigned by the catalog on insert.
    pub id: i64,

    /// Random identifier followed by the original extension (e.g. `aB3kz.txt`).
    pub name: String,

    /// When the upload was accepted.
    pub created_at: DateTime<Utc>,

    /// When the object becomes eligible for the expiry sweep.
    pub expires_at: DateTime<Utc>,
}

impl StoredObject {
    /// Whether the object has expired relative to `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_is_strict() {
        let created_at = Utc::now();
        let obj = StoredObject {
            id: 1,
            name: "abcde.txt".into(),
            created_at,
            expires_at: created_at + Duration::hours(1),
        };

        assert!(!obj.is_expired(created_at));
        assert!(!obj.is_expired(obj.expires_at));
        assert!(obj.is_expired(obj.expires_at + Duration::nanoseconds(1)));
    }
}
