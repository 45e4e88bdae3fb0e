//! Lua scripts run atomically by Redis.
//!
//! All admission scripts share one prelude and one calling convention:
//!
//! - `KEYS`: waiting, `waiting_since`, active, seq (see [`crate::keys`])
//! - `ARGV[1]`: now (ms since epoch)
//! - `ARGV[2]`: slot limit, `-1` for unlimited
//! - `ARGV[3]`: reservation window (ms)
//! - `ARGV[4]`: queue timeout (ms), `0` for none
//! - `ARGV[5]`: user id (join, leave, complete)
//!
//! Each script first reclaims lapsed slots and drops timed-out waiters, then
//! does its own work, then promotes waiters in sequence order while
//! capacity remains. The last three reply elements are always the expired,
//! timed-out and promoted user lists.

use redis::Script;
use std::sync::LazyLock;

const PRELUDE: &str = r"
local waiting, since, active, seq_key = KEYS[1], KEYS[2], KEYS[3], KEYS[4]
local now = tonumber(ARGV[1])
local limit = tonumber(ARGV[2])
local reservation = tonumber(ARGV[3])
local timeout = tonumber(ARGV[4])

local function tidy()
  local expired = redis.call('ZRANGEBYSCORE', active, '-inf', now)
  if #expired > 0 then
    redis.call('ZREMRANGEBYSCORE', active, '-inf', now)
  end
  local timed_out = {}
  if timeout > 0 then
    timed_out = redis.call('ZRANGEBYSCORE', since, '-inf', now - timeout)
    for _, user in ipairs(timed_out) do
      redis.call('ZREM', waiting, user)
      redis.call('ZREM', since, user)
    end
  end
  return expired, timed_out
end

local function has_capacity()
  return limit < 0 or redis.call('ZCARD', active) < limit
end

local function promote()
  local promoted = {}
  while has_capacity() do
    local head = redis.call('ZRANGE', waiting, 0, 0)
    if #head == 0 then
      break
    end
    local user = head[1]
    redis.call('ZREM', waiting, user)
    redis.call('ZREM', since, user)
    redis.call('ZADD', active, now + reservation, user)
    promoted[#promoted + 1] = user
  end
  return promoted
end
";

/// Reply codes of the join script.
pub mod join_code {
    /// Already held a slot.
    pub const ADMITTED_EXISTING: i64 = 1;
    /// Slot granted by this call.
    pub const ADMITTED_NEW: i64 = 2;
    /// Already waiting.
    pub const WAITING_EXISTING: i64 = 3;
    /// Appended by this call.
    pub const WAITING_NEW: i64 = 4;
}

/// Reply codes of the leave script.
pub mod leave_code {
    /// Nothing removed.
    pub const ABSENT: i64 = 0;
    /// Slot released.
    pub const ACTIVE: i64 = 1;
    /// Wait-line entry removed.
    pub const WAITING: i64 = 2;
}

const JOIN_BODY: &str = r"
local user = ARGV[5]
local expired, timed_out = tidy()
local promoted = promote()

local expires = redis.call('ZSCORE', active, user)
if expires then
  return {1, 0, tonumber(expires), expired, timed_out, promoted}
end

local rank = redis.call('ZRANK', waiting, user)
if rank then
  return {3, rank + 1, 0, expired, timed_out, promoted}
end

if has_capacity() then
  redis.call('ZADD', active, now + reservation, user)
  return {2, 0, now + reservation, expired, timed_out, promoted}
end

local seq = redis.call('INCR', seq_key)
redis.call('ZADD', waiting, seq, user)
redis.call('ZADD', since, now, user)
return {4, redis.call('ZCARD', waiting), 0, expired, timed_out, promoted}
";

const LEAVE_BODY: &str = r"
local user = ARGV[5]
local expired, timed_out = tidy()

local released = 0
if redis.call('ZREM', active, user) == 1 then
  released = 1
elseif redis.call('ZREM', waiting, user) == 1 then
  redis.call('ZREM', since, user)
  released = 2
end

local promoted = promote()
return {released, expired, timed_out, promoted}
";

const COMPLETE_BODY: &str = r"
local user = ARGV[5]
local expired, timed_out = tidy()
local held = redis.call('ZREM', active, user)
local promoted = promote()
return {held, expired, timed_out, promoted}
";

const PROCESS_BODY: &str = r"
local expired, timed_out = tidy()
local promoted = promote()
return {expired, timed_out, promoted}
";

fn build(body: &str) -> Script {
    Script::new(&format!("{PRELUDE}{body}"))
}

/// Admit or enqueue.
///
/// Reply: `{code, position, expires_at_ms, expired, timed_out, promoted}`.
pub static JOIN: LazyLock<Script> = LazyLock::new(|| build(JOIN_BODY));

/// Remove from slot set or wait line.
///
/// Reply: `{released, expired, timed_out, promoted}`.
pub static LEAVE: LazyLock<Script> = LazyLock::new(|| build(LEAVE_BODY));

/// Release a slot after checkout.
///
/// Reply: `{held, expired, timed_out, promoted}`.
pub static COMPLETE: LazyLock<Script> = LazyLock::new(|| build(COMPLETE_BODY));

/// Housekeeping and promotion only.
///
/// Reply: `{expired, timed_out, promoted}`.
pub static PROCESS: LazyLock<Script> = LazyLock::new(|| build(PROCESS_BODY));
