//! Lua scripts for multi-key store operations.
//!
//! Each script runs atomically on the Redis server, so a concurrent bootstrap
//! or disconnect never observes a half-applied update.

/// Stamp `last_online` on a user hash only if the user exists.
///
/// Arguments:
/// - KEYS[1]: User hash key (`user:{id}`)
/// - ARGV[1]: Epoch milliseconds
///
/// Returns:
/// - 1: Updated
/// - 0: No such user
pub const SET_LAST_ONLINE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], 'last_online', ARGV[1])
return 1
"#;

/// Clear the peer set of every known meeting.
///
/// Arguments:
/// - KEYS[1]: Meeting index set (`meetings`)
///
/// Returns: number of meetings whose peer set was cleared.
pub const RESET_MEETING_PEERS: &str = r#"
local meetings = redis.call('SMEMBERS', KEYS[1])
for _, id in ipairs(meetings) do
    redis.call('DEL', 'meeting:' .. id .. ':peers')
end
return #meetings
"#;

/// Remove one connection id from every meeting's peer set.
///
/// Arguments:
/// - KEYS[1]: Meeting index set (`meetings`)
/// - ARGV[1]: Connection id
///
/// Returns: number of meetings that contained the connection.
pub const REMOVE_PEER: &str = r#"
local meetings = redis.call('SMEMBERS', KEYS[1])
local removed = 0
for _, id in ipairs(meetings) do
    removed = removed + redis.call('SREM', 'meeting:' .. id .. ':peers', ARGV[1])
end
return removed
"#;

/// Write a user hash and its email index entry together.
///
/// Arguments:
/// - KEYS[1]: User hash key (`user:{id}`)
/// - KEYS[2]: Email index key (`user:email:{email}`)
/// - ARGV[1]: User id
/// - ARGV[2..]: Hash field-value pairs
///
/// Returns: 1
pub const WRITE_USER: &str = r#"
local fields = {}
for i = 2, #ARGV do
    fields[#fields + 1] = ARGV[i]
end
redis.call('HSET', KEYS[1], unpack(fields))
redis.call('SET', KEYS[2], ARGV[1])
return 1
"#;
