//! Limits Enforcer collaborator (§6): gates admission on active shard count
//! and host memory pressure. The spec names the interface but leaves the
//! concrete policy external; this module ships the minimal concrete
//! collaborator needed to exercise the admission path end to end.

use crate::error::LimitsError;
use std::fs;

pub trait LimitsEnforcer: Send + Sync {
    fn check_shard_limit(&self, active_non_system: usize) -> Result<(), LimitsError>;
    fn check_memory(&self) -> Result<(), LimitsError>;
    fn available_shard_slots(&self, active_non_system: usize) -> usize;
}

/// Caps active non-system shards at a fixed count and treats memory as
/// unbounded unless `/proc/self/statm` reports resident pages over the
/// configured ceiling. On non-Linux platforms (or when the file can't be
/// read) memory is always reported OK.
pub struct DefaultLimitsEnforcer {
    pub max_shards: usize,
    pub max_resident_mb: u64,
}

impl Default for DefaultLimitsEnforcer {
    fn default() -> Self {
        Self {
            max_shards: 64,
            max_resident_mb: 4096,
        }
    }
}

impl LimitsEnforcer for DefaultLimitsEnforcer {
    fn check_shard_limit(&self, active_non_system: usize) -> Result<(), LimitsError> {
        if active_non_system >= self.max_shards {
            return Err(LimitsError::LimitExceeded(format!(
                "active shard count {} >= max {}",
                active_non_system, self.max_shards
            )));
        }
        Ok(())
    }

    fn check_memory(&self) -> Result<(), LimitsError> {
        if let Some(resident_mb) = read_resident_mb() {
            if resident_mb > self.max_resident_mb {
                return Err(LimitsError::LimitExceeded(format!(
                    "resident memory {resident_mb}MB exceeds ceiling {}MB",
                    self.max_resident_mb
                )));
            }
        }
        Ok(())
    }

    fn available_shard_slots(&self, active_non_system: usize) -> usize {
        self.max_shards.saturating_sub(active_non_system)
    }
}

#[cfg(target_os = "linux")]
fn read_resident_mb() -> Option<u64> {
    let content = fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = content.split_whitespace().nth(1)?.parse().ok()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
    Some(pages * page_size / (1024 * 1024))
}

#[cfg(not(target_os = "linux"))]
fn read_resident_mb() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_limit_rejects_at_ceiling() {
        let enforcer = DefaultLimitsEnforcer {
            max_shards: 2,
            max_resident_mb: u64::MAX,
        };
        assert!(enforcer.check_shard_limit(1).is_ok());
        assert!(enforcer.check_shard_limit(2).is_err());
    }

    #[test]
    fn memory_check_passes_with_high_ceiling() {
        let enforcer = DefaultLimitsEnforcer {
            max_shards: 64,
            max_resident_mb: u64::MAX,
        };
        assert!(enforcer.check_memory().is_ok());
    }
}
