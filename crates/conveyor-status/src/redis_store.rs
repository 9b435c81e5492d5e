//! Redis-backed status store.
//!
//! Records are stored as JSON values under one key per job. Compare-and-set
//! is a guarded swap: the record is read, the patch applied locally, and a
//! Lua script installs the new value only if the stored value is still the
//! snapshot that was read. A benign concurrent update (one that leaves the
//! status expectation intact) is absorbed by re-reading a bounded number of
//! times.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::debug;

use conveyor_models::{JobId, JobRecord, JobStatus, RecordPatch};

use crate::error::{StatusError, StatusResult};
use crate::store::StatusStore;

const CAS_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    redis.call('SET', KEYS[1], ARGV[2])
    return 1
else
    return 0
end
"#;

const CAS_RETRIES: usize = 3;

/// Redis status store.
pub struct RedisStatusStore {
    client: redis::Client,
    key_prefix: String,
    cas_script: redis::Script,
}

impl RedisStatusStore {
    pub fn connect(redis_url: &str) -> StatusResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            key_prefix: "conveyor:job".to_string(),
            cas_script: redis::Script::new(CAS_SCRIPT),
        })
    }

    /// Create from the `REDIS_URL` environment variable.
    pub fn from_env() -> StatusResult<Self> {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::connect(&redis_url)
    }

    async fn conn(&self) -> StatusResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn key(&self, job_id: &JobId) -> String {
        format!("{}:{}", self.key_prefix, job_id)
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn get(&self, job_id: &JobId) -> StatusResult<Option<JobRecord>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(self.key(job_id)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, record: &JobRecord) -> StatusResult<()> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(record)?;
        let created: bool = conn.set_nx(self.key(&record.id), json).await?;
        if !created {
            return Err(StatusError::already_exists(record.id.as_str()));
        }
        Ok(())
    }

    async fn compare_and_set(
        &self,
        job_id: &JobId,
        expected: &[JobStatus],
        patch: &RecordPatch,
    ) -> StatusResult<bool> {
        let mut conn = self.conn().await?;
        let key = self.key(job_id);

        for _ in 0..CAS_RETRIES {
            let raw: Option<String> = conn.get(&key).await?;
            let Some(old_json) = raw else {
                return Ok(false);
            };

            let mut record: JobRecord = serde_json::from_str(&old_json)?;
            if record.is_terminal() || !expected.contains(&record.status) {
                return Ok(false);
            }
            record.apply(patch);
            let new_json = serde_json::to_string(&record)?;

            let swapped: i32 = self
                .cas_script
                .key(&key)
                .arg(&old_json)
                .arg(&new_json)
                .invoke_async(&mut conn)
                .await?;
            if swapped == 1 {
                return Ok(true);
            }
            debug!(%job_id, "Concurrent record update, re-reading before CAS retry");
        }

        Ok(false)
    }
}
