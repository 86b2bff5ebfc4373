//! Time source used by every expiry and revalidation check.

use chrono::{DateTime, Utc};

/// Wall clock abstraction, so expiry logic can be driven from tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
