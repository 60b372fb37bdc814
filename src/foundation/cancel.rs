use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use crate::foundation::error::{ForgeError, ForgeResult};

/// Cooperative cancellation flag shared between a generation run and its caller.
///
/// Checked before every draw and between layer draws while compositing.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    checks_left: Option<Arc<AtomicU64>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that cancels itself once `limit` checks have passed.
    ///
    /// Bounds the work of a run without a second thread watching it.
    pub fn with_check_limit(limit: u64) -> Self {
        Self {
            flag: Arc::default(),
            checks_left: Some(Arc::new(AtomicU64::new(limit))),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn check(&self) -> ForgeResult<()> {
        if let Some(left) = &self.checks_left
            && left
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_err()
        {
            self.cancel();
        }
        if self.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        Ok(())
    }
}
