mod maths_utils;
mod perf;
mod time_utils;

pub use time_utils::{AppInstant, TimeUtils, now_utc};

pub(crate) use maths_utils::{mean_of, safe_ratio};
