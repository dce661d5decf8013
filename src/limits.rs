/// Longest member name accepted.
pub const MAX_NAME_LEN: usize = 120;

/// RFC 5321 path limit.
pub const MAX_EMAIL_LEN: usize = 254;

pub const MAX_PHONE_LEN: usize = 32;

pub const MAX_SETTING_KEY_LEN: usize = 64;

/// Logo references may be data URLs, so values get more room than keys.
pub const MAX_SETTING_VALUE_LEN: usize = 64 * 1024;

/// Capacity of each per-table change broadcast channel.
pub const CHANGE_CHANNEL_CAPACITY: usize = 1024;
