use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use sigil_core::error::{Result, SigilError};

/// At most one credential prompt per identity at a time.
#[derive(Debug, Clone, Default)]
pub struct PromptGate {
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl PromptGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, identity_key: &str) -> Result<PromptGuard> {
        let mut set = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(identity_key.to_string()) {
            tracing::debug!(identity = identity_key, "prompt already in flight");
            return Err(SigilError::PromptInFlight(identity_key.to_string()));
        }
        Ok(PromptGuard {
            in_flight: Arc::clone(&self.in_flight),
            identity_key: identity_key.to_string(),
        })
    }

    pub fn is_in_flight(&self, identity_key: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(identity_key)
    }
}

/// Releases the identity's slot on drop, including on error and cancellation paths.
#[derive(Debug)]
pub struct PromptGuard {
    in_flight: Arc<Mutex<HashSet<String>>>,
    identity_key: String,
}

impl Drop for PromptGuard {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.identity_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_prompt_per_identity() {
        let gate = PromptGate::new();
        let guard = gate.try_acquire("phi123").unwrap();
        assert!(gate.is_in_flight("phi123"));
        assert!(matches!(
            gate.try_acquire("phi123"),
            Err(SigilError::PromptInFlight(_))
        ));
        let _other = gate.try_acquire("phi456").unwrap();

        drop(guard);
        assert!(!gate.is_in_flight("phi123"));
        gate.try_acquire("phi123").unwrap();
    }
}
