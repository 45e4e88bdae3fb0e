//! Redis-backed [`AdmissionStore`].
//!
//! Mutations run as single Lua scripts (see [`crate::scripts`]); the status
//! read is one `MULTI` pipeline. Nothing here reads a value and writes it
//! back from Rust.

use crate::error::store_error;
use crate::keys::EventKeys;
use crate::scripts::{self, join_code, leave_code};
use chrono::{DateTime, Utc};
use purchase_queue_core::{
    EventId, QueueError, Result, UserId,
    store::{
        AdmissionPolicy, AdmissionStore, CompleteOutcome, Housekeeping, JoinOutcome, Placement,
        ReleaseOutcome, Released, StatusView, StoreFuture, UserStanding,
    },
};
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue, Script};

type Users = Vec<String>;

/// `Redis` admission store.
///
/// # Example
///
/// ```no_run
/// use purchase_queue_redis::RedisAdmissionStore;
/// use purchase_queue_core::{EventId, UserId, store::{AdmissionPolicy, AdmissionStore}};
/// use chrono::Utc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = RedisAdmissionStore::new("redis://127.0.0.1:6379").await?;
/// let outcome = store
///     .join(&EventId::new("concert-42"), &UserId::new("u1"), AdmissionPolicy::unlimited(), Utc::now())
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RedisAdmissionStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
}

impl RedisAdmissionStore {
    /// Connect to `Redis`.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the connection fails.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(store_error("create Redis client"))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(store_error("create Redis connection manager"))?;
        Ok(Self { conn_manager })
    }

    /// Share an existing connection manager.
    #[must_use]
    pub const fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self { conn_manager }
    }

    async fn invoke<T: FromRedisValue>(
        &self,
        script: &Script,
        event_id: &EventId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
        user_id: Option<&UserId>,
        operation: &'static str,
    ) -> Result<T> {
        let mut conn = self.conn_manager.clone();
        let keys = EventKeys::new(event_id);
        let mut invocation = script.prepare_invoke();
        for key in keys.script_keys() {
            invocation.key(key);
        }
        invocation
            .arg(now.timestamp_millis())
            .arg(policy.limit.map_or(-1, i64::from))
            .arg(policy.reservation.num_milliseconds())
            .arg(policy.queue_timeout.map_or(0, |t| t.num_milliseconds()));
        if let Some(user_id) = user_id {
            invocation.arg(user_id.as_str());
        }

        let reply: T = invocation.invoke_async(&mut conn).await.map_err(|e| {
            metrics::counter!("purchase_queue_store_errors_total", "operation" => operation)
                .increment(1);
            store_error(operation)(e)
        })?;
        Ok(reply)
    }
}

fn users(raw: Users) -> Result<Vec<UserId>> {
    raw.into_iter()
        .map(|user| {
            UserId::parse(user).map_err(|e| QueueError::CorruptState(format!("user id: {e}")))
        })
        .collect()
}

fn housekeeping(expired: Users, timed_out: Users, promoted: Users) -> Result<Housekeeping> {
    Ok(Housekeeping {
        expired: users(expired)?,
        timed_out: users(timed_out)?,
        promoted: users(promoted)?,
    })
}

fn timestamp(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| QueueError::CorruptState(format!("timestamp out of range: {ms}")))
}

fn rank(raw: i64) -> Result<u64> {
    u64::try_from(raw).map_err(|_| QueueError::CorruptState(format!("negative rank: {raw}")))
}

fn log_housekeeping(event_id: &EventId, operation: &str, housekeeping: &Housekeeping) {
    if !housekeeping.is_empty() {
        tracing::debug!(
            event_id = %event_id,
            operation,
            expired = housekeeping.expired.len(),
            timed_out = housekeeping.timed_out.len(),
            promoted = housekeeping.promoted.len(),
            "Queue housekeeping"
        );
    }
}

impl AdmissionStore for RedisAdmissionStore {
    fn join<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: &'a UserId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, JoinOutcome> {
        Box::pin(async move {
            let (code, position, expires_ms, expired, timed_out, promoted): (
                i64,
                i64,
                i64,
                Users,
                Users,
                Users,
            ) = self
                .invoke(&scripts::JOIN, event_id, policy, now, Some(user_id), "join")
                .await?;

            let placement = match code {
                join_code::ADMITTED_EXISTING | join_code::ADMITTED_NEW => Placement::Admitted {
                    expires_at: timestamp(expires_ms)?,
                    newly: code == join_code::ADMITTED_NEW,
                },
                join_code::WAITING_EXISTING | join_code::WAITING_NEW => Placement::Waiting {
                    position: rank(position)?,
                    newly: code == join_code::WAITING_NEW,
                },
                other => {
                    return Err(QueueError::CorruptState(format!(
                        "unknown join reply code {other}"
                    )));
                }
            };
            let housekeeping = housekeeping(expired, timed_out, promoted)?;
            log_housekeeping(event_id, "join", &housekeeping);

            Ok(JoinOutcome {
                placement,
                housekeeping,
            })
        })
    }

    fn leave<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: &'a UserId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, ReleaseOutcome> {
        Box::pin(async move {
            let (code, expired, timed_out, promoted): (i64, Users, Users, Users) = self
                .invoke(&scripts::LEAVE, event_id, policy, now, Some(user_id), "leave")
                .await?;

            let released = match code {
                leave_code::ACTIVE => Released::Active,
                leave_code::WAITING => Released::Waiting,
                leave_code::ABSENT => Released::Absent,
                other => {
                    return Err(QueueError::CorruptState(format!(
                        "unknown leave reply code {other}"
                    )));
                }
            };
            let housekeeping = housekeeping(expired, timed_out, promoted)?;
            log_housekeeping(event_id, "leave", &housekeeping);

            Ok(ReleaseOutcome {
                released,
                housekeeping,
            })
        })
    }

    fn complete<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: &'a UserId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, CompleteOutcome> {
        Box::pin(async move {
            let (held, expired, timed_out, promoted): (i64, Users, Users, Users) = self
                .invoke(
                    &scripts::COMPLETE,
                    event_id,
                    policy,
                    now,
                    Some(user_id),
                    "complete",
                )
                .await?;

            let housekeeping = housekeeping(expired, timed_out, promoted)?;
            log_housekeeping(event_id, "complete", &housekeeping);

            Ok(CompleteOutcome {
                held: held == 1,
                housekeeping,
            })
        })
    }

    fn process<'a>(
        &'a self,
        event_id: &'a EventId,
        policy: AdmissionPolicy,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, Housekeeping> {
        Box::pin(async move {
            let (expired, timed_out, promoted): (Users, Users, Users) = self
                .invoke(&scripts::PROCESS, event_id, policy, now, None, "process")
                .await?;

            let housekeeping = housekeeping(expired, timed_out, promoted)?;
            log_housekeeping(event_id, "process", &housekeeping);
            Ok(housekeeping)
        })
    }

    fn status<'a>(
        &'a self,
        event_id: &'a EventId,
        user_id: Option<&'a UserId>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'a, StatusView> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let keys = EventKeys::new(event_id);
            let now_ms = now.timestamp_millis();

            let mut pipe = redis::pipe();
            pipe.atomic()
                .zcard(&keys.waiting)
                .cmd("ZCOUNT")
                .arg(&keys.active)
                .arg(format!("({now_ms}"))
                .arg("+inf");

            let Some(user_id) = user_id else {
                let (queue_length, active_buyers): (u64, u64) = pipe
                    .query_async(&mut conn)
                    .await
                    .map_err(store_error("read queue status"))?;
                return Ok(StatusView {
                    queue_length,
                    active_buyers,
                    user: None,
                });
            };

            pipe.zscore(&keys.active, user_id.as_str())
                .zrank(&keys.waiting, user_id.as_str());
            let (queue_length, active_buyers, expires_ms, rank_raw): (
                u64,
                u64,
                Option<f64>,
                Option<i64>,
            ) = pipe
                .query_async(&mut conn)
                .await
                .map_err(store_error("read queue status"))?;

            #[allow(clippy::cast_possible_truncation)] // Scores are integral epoch milliseconds
            let standing = match (expires_ms.map(|ms| ms as i64), rank_raw) {
                (Some(ms), _) if ms > now_ms => UserStanding::Active {
                    expires_at: timestamp(ms)?,
                },
                (_, Some(r)) => UserStanding::Waiting {
                    position: rank(r)? + 1,
                },
                _ => UserStanding::Absent,
            };

            Ok(StatusView {
                queue_length,
                active_buyers,
                user: Some(standing),
            })
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn_manager.clone();
            let _: String = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(store_error("ping Redis"))?;
            Ok(())
        })
    }
}
