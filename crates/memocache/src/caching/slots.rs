use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// A per-key lock guarding the removal generation of that key.
///
/// Every manual removal bumps the generation. A computation remembers the generation it
/// started with, and only persists its result if no removal happened in the meantime.
pub(super) type Slot = Arc<tokio::sync::Mutex<u64>>;

/// Hands out one [`Slot`] per key for as long as anyone holds on to it.
#[derive(Debug, Default)]
pub(super) struct KeySlots {
    slots: Mutex<HashMap<String, Weak<tokio::sync::Mutex<u64>>>>,
}

impl KeySlots {
    pub fn get(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap();
        if let Some(slot) = slots.get(key).and_then(Weak::upgrade) {
            return slot;
        }

        slots.retain(|_, slot| slot.strong_count() > 0);
        let slot = Slot::default();
        slots.insert(key.to_owned(), Arc::downgrade(&slot));
        slot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_slot_is_shared_while_alive() {
        let slots = KeySlots::default();

        let first = slots.get("key");
        *first.lock().await += 1;

        let second = slots.get("key");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(*second.lock().await, 1);

        drop((first, second));
        let fresh = slots.get("key");
        assert_eq!(*fresh.lock().await, 0);
        assert_eq!(slots.slots.lock().unwrap().len(), 1);
    }
}
