//! Fault injection for the in-memory collaborators

use ledgerfs_core::{CoreError, CoreResult};
use parking_lot::Mutex;

/// Failure a memory collaborator should report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Every call fails with [`CoreError::Unavailable`]
    Unavailable,
    /// Every call fails with [`CoreError::Unauthorized`]
    Unauthorized,
}

/// Switchable fault, checked at the start of each collaborator call
#[derive(Debug, Default)]
pub struct FaultSwitch {
    current: Mutex<Option<Fault>>,
}

impl FaultSwitch {
    /// Start (or with `None`, stop) failing calls
    pub fn set(&self, fault: Option<Fault>) {
        *self.current.lock() = fault;
    }

    /// Fail `op` if a fault is active
    pub fn check(&self, op: &str) -> CoreResult<()> {
        match *self.current.lock() {
            None => Ok(()),
            Some(Fault::Unavailable) => Err(CoreError::Unavailable(format!("{} timed out", op))),
            Some(Fault::Unauthorized) => Err(CoreError::Unauthorized(format!("{} denied", op))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch() {
        let switch = FaultSwitch::default();
        assert!(switch.check("put").is_ok());

        switch.set(Some(Fault::Unauthorized));
        assert!(switch.check("put").unwrap_err().is_unauthorized());

        switch.set(Some(Fault::Unavailable));
        assert!(switch.check("append").unwrap_err().is_transient());

        switch.set(None);
        assert!(switch.check("append").is_ok());
    }
}
