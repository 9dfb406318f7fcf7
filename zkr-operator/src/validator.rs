//! Transfer validation against a tree snapshot.

use tracing::debug;
use zkr_common::verify;

use crate::error::ValidationError;
use crate::models::{BalanceLeaf, BalanceTree, Transaction, Wei};

/// Minimum fee as a fraction of the transferred amount.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeePolicy {
    pub numerator: u128,
    pub denominator: u128,
}

impl Default for FeePolicy {
    /// 0.3% of the amount.
    fn default() -> Self {
        Self {
            numerator: 3,
            denominator: 1000,
        }
    }
}

impl FeePolicy {
    pub fn new(numerator: u128, denominator: u128) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// `amount * numerator / denominator`, rounded down, saturating on overflow.
    pub fn minimum_fee(&self, amount: Wei) -> Wei {
        if self.denominator == 0 {
            return Wei::MAX;
        }
        let whole = (amount / self.denominator).saturating_mul(self.numerator);
        let part = (amount % self.denominator).saturating_mul(self.numerator) / self.denominator;
        whole.saturating_add(part)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Validator {
    policy: FeePolicy,
}

impl Validator {
    pub fn new(policy: FeePolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> FeePolicy {
        self.policy
    }

    /// Checks a transfer against `tree` without mutating it.
    ///
    /// Checks run in a fixed order: account existence, funds, fee, nonce,
    /// signature. The first failure is returned.
    pub fn validate(&self, tree: &BalanceTree, tx: &Transaction) -> Result<(), ValidationError> {
        let sender = account(tree, tx.from)?;
        account(tree, tx.to)?;

        let required = tx
            .amount
            .checked_add(tx.fee)
            .ok_or(ValidationError::InsufficientFunds {
                balance: sender.balance,
                required: Wei::MAX,
            })?;
        if sender.balance < required {
            return Err(ValidationError::InsufficientFunds {
                balance: sender.balance,
                required,
            });
        }

        let minimum = self.policy.minimum_fee(tx.amount);
        if tx.fee < minimum {
            return Err(ValidationError::FeeTooLow {
                fee: tx.fee,
                minimum,
            });
        }

        // An exhausted nonce has no successor; nothing can match it.
        let expected = sender.nonce.checked_add(1);
        if expected != Some(tx.nonce) {
            return Err(ValidationError::NonceMismatch {
                expected: expected.unwrap_or(u64::MAX),
                got: tx.nonce,
            });
        }

        let signature = tx.signature.as_ref().ok_or(ValidationError::InvalidSignature)?;
        if !verify(&tx.signing_fields(), signature, &sender.public_key) {
            return Err(ValidationError::InvalidSignature);
        }

        debug!(from = tx.from, to = tx.to, nonce = tx.nonce, "transfer validated");
        Ok(())
    }
}

fn account(tree: &BalanceTree, index: u64) -> Result<&BalanceLeaf, ValidationError> {
    if index >= tree.next_leaf_index() {
        return Err(ValidationError::UnknownAccount { index });
    }
    tree.leaf_raw(index)
        .ok_or(ValidationError::UnknownAccount { index })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ether, milliether};
    use halo2curves_axiom::bn256::Fr;
    use halo2curves_axiom::ff::Field;
    use zkr_common::PrivateKey;

    fn keys() -> (PrivateKey, PrivateKey) {
        (
            PrivateKey::from_scalar(Fr::from(1001)),
            PrivateKey::from_scalar(Fr::from(2002)),
        )
    }

    fn funded_tree() -> BalanceTree {
        let (a, b) = keys();
        let mut tree = BalanceTree::new(3, Fr::ZERO).unwrap();
        tree.insert_leaf(BalanceLeaf::new(a.public_key(), ether(1), 0))
            .unwrap();
        tree.insert_leaf(BalanceLeaf::new(b.public_key(), ether(1), 0))
            .unwrap();
        tree
    }

    #[test]
    fn minimum_fee_rounds_down() {
        let policy = FeePolicy::default();
        assert_eq!(policy.minimum_fee(1000), 3);
        assert_eq!(policy.minimum_fee(999), 2);
        assert_eq!(policy.minimum_fee(milliether(100)), milliether(100) * 3 / 1000);
        assert_eq!(policy.minimum_fee(Wei::MAX), Wei::MAX / 1000 * 3 + 1);
    }

    #[test]
    fn well_formed_transfer_is_accepted() {
        let (a, _) = keys();
        let tx = Transaction::new(0, 1, milliether(100), milliether(10), 1).signed(&a);
        assert_eq!(Validator::default().validate(&funded_tree(), &tx), Ok(()));
    }

    #[test]
    fn unknown_accounts_are_rejected_first() {
        let (a, _) = keys();
        let tx = Transaction::new(0, 7, ether(5), 0, 9).signed(&a);
        assert_eq!(
            Validator::default().validate(&funded_tree(), &tx),
            Err(ValidationError::UnknownAccount { index: 7 })
        );
    }

    #[test]
    fn insufficient_funds_counts_the_fee() {
        let (a, _) = keys();
        let tx = Transaction::new(0, 1, ether(1), milliether(3), 1).signed(&a);
        assert_eq!(
            Validator::default().validate(&funded_tree(), &tx),
            Err(ValidationError::InsufficientFunds {
                balance: ether(1),
                required: ether(1) + milliether(3),
            })
        );
    }

    #[test]
    fn low_fee_is_rejected() {
        let (a, _) = keys();
        let tx = Transaction::new(0, 1, milliether(100), 1, 1).signed(&a);
        assert!(matches!(
            Validator::default().validate(&funded_tree(), &tx),
            Err(ValidationError::FeeTooLow { fee: 1, .. })
        ));
    }

    #[test]
    fn stale_nonce_is_rejected() {
        let (a, _) = keys();
        let tx = Transaction::new(0, 1, milliether(100), milliether(1), 2).signed(&a);
        assert_eq!(
            Validator::default().validate(&funded_tree(), &tx),
            Err(ValidationError::NonceMismatch { expected: 1, got: 2 })
        );
    }

    #[test]
    fn exhausted_sender_nonce_is_rejected() {
        let (a, b) = keys();
        let mut tree = BalanceTree::new(3, Fr::ZERO).unwrap();
        tree.insert_leaf(BalanceLeaf::new(a.public_key(), ether(1), u64::MAX))
            .unwrap();
        tree.insert_leaf(BalanceLeaf::new(b.public_key(), ether(1), 0))
            .unwrap();

        for nonce in [0, u64::MAX] {
            let tx = Transaction::new(0, 1, milliether(100), milliether(1), nonce).signed(&a);
            assert_eq!(
                Validator::default().validate(&tree, &tx),
                Err(ValidationError::NonceMismatch {
                    expected: u64::MAX,
                    got: nonce
                })
            );
        }
    }

    #[test]
    fn foreign_or_missing_signature_is_rejected() {
        let (_, b) = keys();
        let forged = Transaction::new(0, 1, milliether(100), milliether(1), 1).signed(&b);
        assert_eq!(
            Validator::default().validate(&funded_tree(), &forged),
            Err(ValidationError::InvalidSignature)
        );

        let unsigned = Transaction::new(0, 1, milliether(100), milliether(1), 1);
        assert_eq!(
            Validator::default().validate(&funded_tree(), &unsigned),
            Err(ValidationError::InvalidSignature)
        );
    }
}
