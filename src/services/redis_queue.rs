use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::models::job::{Job, JobId, JobLease, JobPayload, JobProgress, JobResult, JobState};
use crate::services::queue::{JobStore, QueueError, QueueResult, STALLED_ERROR};

/// Pops waiting ids until one is still `waiting`, then marks it `active`
/// under the claiming worker's lease.
///
/// KEYS: wait list, active set. ARGV: job key prefix, timestamp, worker,
/// lease expiry (epoch millis).
const CLAIM_SCRIPT: &str = r#"
while true do
  local id = redis.call('RPOP', KEYS[1])
  if not id then return false end
  local key = ARGV[1] .. id
  if redis.call('HGET', key, 'state') == 'waiting' then
    redis.call('HSET', key, 'state', 'active', 'updated_at', ARGV[2],
      'lease_owner', ARGV[3], 'lease_until', ARGV[4])
    redis.call('SADD', KEYS[2], id)
    return id
  end
end
"#;

/// Extends the lease of an active job held by the given worker.
///
/// KEYS: job key. ARGV: worker, lease expiry (epoch millis).
/// Returns 1 on renewal, -1 when missing, -3 when the lease is gone.
const RENEW_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then return -1 end
if state ~= 'active' or redis.call('HGET', KEYS[1], 'lease_owner') ~= ARGV[1] then return -3 end
redis.call('HSET', KEYS[1], 'lease_until', ARGV[2])
return 1
"#;

/// Writes progress on an active job if it moves forward.
///
/// KEYS: job key. ARGV: progress json, percent, timestamp.
/// Returns 1 on write, 0 when behind, -1 when missing, -2 when not active.
const PROGRESS_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then return -1 end
if state ~= 'active' then return -2 end
local current = tonumber(redis.call('HGET', KEYS[1], 'percent') or '0')
if tonumber(ARGV[2]) < current then return 0 end
redis.call('HSET', KEYS[1], 'progress', ARGV[1], 'percent', ARGV[2], 'updated_at', ARGV[3])
return 1
"#;

/// Moves an active job to a terminal state and stores its outcome field.
///
/// KEYS: job key, active set. ARGV: new state, field, value, timestamp, id,
/// retention seconds (0 keeps the hash).
/// Returns 1 on success, -1 when missing, -2 when not active.
const FINISH_SCRIPT: &str = r#"
local state = redis.call('HGET', KEYS[1], 'state')
if not state then return -1 end
if state ~= 'active' then return -2 end
redis.call('HSET', KEYS[1], 'state', ARGV[1], ARGV[2], ARGV[3], 'updated_at', ARGV[4])
if tonumber(ARGV[6]) > 0 then redis.call('EXPIRE', KEYS[1], ARGV[6]) end
redis.call('SREM', KEYS[2], ARGV[5])
return 1
"#;

/// Fails every active job whose lease expired and drops stale active-set
/// entries. Returns the number of jobs failed.
///
/// KEYS: active set. ARGV: job key prefix, now (epoch millis), error,
/// timestamp, retention seconds.
const RECOVER_SCRIPT: &str = r#"
local recovered = 0
for _, id in ipairs(redis.call('SMEMBERS', KEYS[1])) do
  local key = ARGV[1] .. id
  if redis.call('HGET', key, 'state') ~= 'active' then
    redis.call('SREM', KEYS[1], id)
  elseif tonumber(redis.call('HGET', key, 'lease_until') or '0') <= tonumber(ARGV[2]) then
    redis.call('HSET', key, 'state', 'failed', 'error', ARGV[3], 'updated_at', ARGV[4])
    if tonumber(ARGV[5]) > 0 then redis.call('EXPIRE', key, ARGV[5]) end
    redis.call('SREM', KEYS[1], id)
    recovered = recovered + 1
  end
end
return recovered
"#;

/// Redis-backed job queue.
///
/// Each job is a hash at `{queue}:job:{id}`; waiting ids sit in the
/// `{queue}:wait` list and claimed ids in the `{queue}:active` set.
pub struct RedisJobQueue {
    client: redis::Client,
    wait_key: String,
    active_key: String,
    job_prefix: String,
    retention_secs: u64,
    claim: Script,
    renew: Script,
    progress: Script,
    finish: Script,
    recover: Script,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            wait_key: format!("{queue_name}:wait"),
            active_key: format!("{queue_name}:active"),
            job_prefix: format!("{queue_name}:job:"),
            retention_secs: 0,
            claim: Script::new(CLAIM_SCRIPT),
            renew: Script::new(RENEW_SCRIPT),
            progress: Script::new(PROGRESS_SCRIPT),
            finish: Script::new(FINISH_SCRIPT),
            recover: Script::new(RECOVER_SCRIPT),
        })
    }

    /// Expire finished job hashes after `retention`; `None` keeps them.
    pub fn with_retention(mut self, retention: Option<Duration>) -> Self {
        self.retention_secs = retention.map_or(0, |r| r.as_secs().max(1));
        self
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }

    fn job_key(&self, id: JobId) -> String {
        format!("{}{}", self.job_prefix, id)
    }

    async fn load(&self, conn: &mut MultiplexedConnection, id: JobId) -> QueueResult<Option<Job>> {
        let fields: HashMap<String, String> = conn.hgetall(self.job_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_job(&fields).map(Some)
    }

    async fn finish(&self, id: JobId, state: JobState, field: &str, value: &str) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let outcome: i64 = self
            .finish
            .key(self.job_key(id))
            .key(&self.active_key)
            .arg(state.to_string())
            .arg(field)
            .arg(value)
            .arg(Utc::now().to_rfc3339())
            .arg(id.to_string())
            .arg(self.retention_secs)
            .invoke_async(&mut conn)
            .await?;
        self.check_outcome(&mut conn, id, state, outcome).await
    }

    async fn check_outcome(
        &self,
        conn: &mut MultiplexedConnection,
        id: JobId,
        to: JobState,
        outcome: i64,
    ) -> QueueResult<()> {
        match outcome {
            -1 => Err(QueueError::NotFound(id)),
            -3 => Err(QueueError::LeaseLost(id)),
            -2 => {
                let from = match self.load(conn, id).await? {
                    Some(job) => job.state,
                    None => return Err(QueueError::NotFound(id)),
                };
                Err(QueueError::InvalidTransition { id, from, to })
            }
            _ => Ok(()),
        }
    }
}

fn field<'a>(fields: &'a HashMap<String, String>, name: &str) -> QueueResult<&'a str> {
    fields.get(name).map(String::as_str).ok_or_else(|| QueueError::Corrupt {
        id: fields.get("id").cloned().unwrap_or_default(),
        reason: format!("missing field {name}"),
    })
}

fn corrupt(fields: &HashMap<String, String>, reason: impl std::fmt::Display) -> QueueError {
    QueueError::Corrupt {
        id: fields.get("id").cloned().unwrap_or_default(),
        reason: reason.to_string(),
    }
}

fn decode_time(fields: &HashMap<String, String>, name: &str) -> QueueResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(field(fields, name)?)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(fields, e))
}

fn decode_lease(fields: &HashMap<String, String>) -> QueueResult<Option<JobLease>> {
    let (Some(worker), Some(until)) = (fields.get("lease_owner"), fields.get("lease_until")) else {
        return Ok(None);
    };
    let millis: i64 = until.parse().map_err(|e| corrupt(fields, e))?;
    let expires_at = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| corrupt(fields, format!("lease expiry {millis} out of range")))?;
    Ok(Some(JobLease {
        worker: worker.clone(),
        expires_at,
    }))
}

fn decode_job(fields: &HashMap<String, String>) -> QueueResult<Job> {
    let id = Uuid::parse_str(field(fields, "id")?).map_err(|e| corrupt(fields, e))?;
    let state = field(fields, "state")?
        .parse::<JobState>()
        .map_err(|e| corrupt(fields, e))?;
    let payload: JobPayload = serde_json::from_str(field(fields, "payload")?)?;
    let progress: JobProgress = match fields.get("progress") {
        Some(raw) => serde_json::from_str(raw)?,
        None => JobProgress::default(),
    };
    let result: Option<JobResult> = match fields.get("result") {
        Some(raw) => Some(serde_json::from_str(raw)?),
        None => None,
    };

    Ok(Job {
        id,
        payload,
        state,
        progress,
        result,
        error: fields.get("error").cloned(),
        lease: decode_lease(fields)?,
        created_at: decode_time(fields, "created_at")?,
        updated_at: decode_time(fields, "updated_at")?,
    })
}

#[async_trait]
impl JobStore for RedisJobQueue {
    async fn enqueue(&self, payload: JobPayload) -> QueueResult<Job> {
        let job = Job::new(payload);
        let mut conn = self.conn().await?;
        let fields = [
            ("id", job.id.to_string()),
            ("state", job.state.to_string()),
            ("payload", serde_json::to_string(&job.payload)?),
            ("progress", serde_json::to_string(&job.progress)?),
            ("percent", job.progress.percent.to_string()),
            ("created_at", job.created_at.to_rfc3339()),
            ("updated_at", job.updated_at.to_rfc3339()),
        ];

        redis::pipe()
            .atomic()
            .hset_multiple(self.job_key(job.id), &fields)
            .ignore()
            .lpush(&self.wait_key, job.id.to_string())
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;

        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        self.load(&mut conn, id).await
    }

    async fn claim_next(&self, worker: &str, lease: Duration) -> QueueResult<Option<Job>> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let claimed: Option<String> = self
            .claim
            .key(&self.wait_key)
            .key(&self.active_key)
            .arg(&self.job_prefix)
            .arg(now.to_rfc3339())
            .arg(worker)
            .arg(JobLease::new(worker, now, lease).expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        let Some(raw_id) = claimed else {
            return Ok(None);
        };
        let id = Uuid::parse_str(&raw_id).map_err(|e| QueueError::Corrupt {
            id: raw_id.clone(),
            reason: e.to_string(),
        })?;
        self.load(&mut conn, id).await
    }

    async fn renew_lease(&self, id: JobId, worker: &str, lease: Duration) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let outcome: i64 = self
            .renew
            .key(self.job_key(id))
            .arg(worker)
            .arg(JobLease::new(worker, Utc::now(), lease).expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await?;
        self.check_outcome(&mut conn, id, JobState::Active, outcome).await
    }

    async fn update_progress(&self, id: JobId, progress: &JobProgress) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let outcome: i64 = self
            .progress
            .key(self.job_key(id))
            .arg(serde_json::to_string(progress)?)
            .arg(progress.percent)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        self.check_outcome(&mut conn, id, JobState::Active, outcome).await
    }

    async fn complete(&self, id: JobId, result: &JobResult) -> QueueResult<()> {
        let encoded = serde_json::to_string(result)?;
        self.finish(id, JobState::Completed, "result", &encoded).await
    }

    async fn fail(&self, id: JobId, error: &str) -> QueueResult<()> {
        self.finish(id, JobState::Failed, "error", error).await
    }

    async fn recover_stalled(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let now = Utc::now();
        let recovered: u64 = self
            .recover
            .key(&self.active_key)
            .arg(&self.job_prefix)
            .arg(now.timestamp_millis())
            .arg(STALLED_ERROR)
            .arg(now.to_rfc3339())
            .arg(self.retention_secs)
            .invoke_async(&mut conn)
            .await?;
        Ok(recovered)
    }

    async fn queue_depth(&self) -> QueueResult<u64> {
        let mut conn = self.conn().await?;
        let depth: u64 = conn.llen(&self.wait_key).await?;
        Ok(depth)
    }

    /// Check Redis connectivity (for health checks).
    async fn health_check(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
