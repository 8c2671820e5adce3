//! Idempotency and lock-ordering policy
//!
//! Pure rules shared by the facade and the processor so duplicate detection
//! and multi-wallet lock ordering live in exactly one place. The fixed
//! global lock order is what prevents deadlock between two concurrent
//! transfers moving money in opposite directions between the same pair.

use crate::types::IdempotencyKey;
use uuid::Uuid;

/// Deterministic lock-acquisition order for a wallet pair: ascending UUID
/// byte order, which equals ascending lexical order of the canonical
/// string form.
pub fn lock_order(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Idempotency keys a single-wallet operation checks and inserts.
pub fn single_keys(transaction_id: &IdempotencyKey) -> [IdempotencyKey; 1] {
    [transaction_id.clone()]
}

/// Idempotency keys a transfer checks and inserts: the original key on the
/// debit leg, the derived key on the credit leg.
pub fn transfer_keys(transaction_id: &IdempotencyKey) -> [IdempotencyKey; 2] {
    [transaction_id.clone(), transaction_id.credit_leg()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_order_deterministic() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        assert_eq!(lock_order(a, b), lock_order(b, a));

        let (first, second) = lock_order(a, b);
        assert!(first <= second);
    }

    #[test]
    fn test_lock_order_matches_lexical_string_order() {
        for _ in 0..64 {
            let a = Uuid::new_v4();
            let b = Uuid::new_v4();
            let (first, second) = lock_order(a, b);
            assert!(first.to_string() <= second.to_string());
        }
    }

    #[test]
    fn test_lock_order_same_wallet() {
        let a = Uuid::new_v4();
        assert_eq!(lock_order(a, a), (a, a));
    }

    #[test]
    fn test_transfer_keys_distinct() {
        let key = IdempotencyKey::new("t1");
        let [debit, credit] = transfer_keys(&key);
        assert_eq!(debit.as_str(), "t1");
        assert_eq!(credit.as_str(), "t1_CREDIT");
        assert_ne!(debit, credit);
    }
}
