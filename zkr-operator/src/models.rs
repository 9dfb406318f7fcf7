//! Account leaves and transfers.

use halo2curves_axiom::bn256::Fr;
use halo2curves_axiom::ff::Field;
use serde::{Deserialize, Serialize};
use zkr_common::{fr_from_u128, multi_hash, sign, PrivateKey, Point, Signature};
use zkr_merkle::{MerkleTree, TreeLeaf};

/// Amounts are denominated in wei.
pub type Wei = u128;

pub const WEI_PER_ETHER: Wei = 1_000_000_000_000_000_000;

pub const fn ether(units: u128) -> Wei {
    units * WEI_PER_ETHER
}

pub const fn milliether(units: u128) -> Wei {
    units * (WEI_PER_ETHER / 1_000)
}

/// The operator's account tree.
pub type BalanceTree = MerkleTree<BalanceLeaf>;

/// One registered account.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceLeaf {
    pub public_key: Point,
    #[serde(with = "serde_wei")]
    pub balance: Wei,
    pub nonce: u64,
}

impl BalanceLeaf {
    pub fn new(public_key: Point, balance: Wei, nonce: u64) -> Self {
        Self {
            public_key,
            balance,
            nonce,
        }
    }

    /// `[pk.x, pk.y, balance, nonce]`
    pub fn fields(&self) -> [Fr; 4] {
        [
            self.public_key.x,
            self.public_key.y,
            fr_from_u128(self.balance),
            Fr::from(self.nonce),
        ]
    }
}

impl TreeLeaf for BalanceLeaf {
    fn leaf_hash(&self) -> Fr {
        multi_hash(&self.fields())
    }
}

/// A transfer between two registered accounts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub from: u64,
    pub to: u64,
    #[serde(with = "serde_wei")]
    pub amount: Wei,
    #[serde(with = "serde_wei")]
    pub fee: Wei,
    pub nonce: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
}

impl Transaction {
    pub fn new(from: u64, to: u64, amount: Wei, fee: Wei, nonce: u64) -> Self {
        Self {
            from,
            to,
            amount,
            fee,
            nonce,
            signature: None,
        }
    }

    /// The signed message: `[from, to, amount, fee, nonce]`.
    pub fn signing_fields(&self) -> Vec<Fr> {
        vec![
            Fr::from(self.from),
            Fr::from(self.to),
            fr_from_u128(self.amount),
            fr_from_u128(self.fee),
            Fr::from(self.nonce),
        ]
    }

    pub fn signed(mut self, sk: &PrivateKey) -> Self {
        self.signature = Some(sign(sk, &self.signing_fields()));
        self
    }

    pub fn hash(&self) -> Fr {
        multi_hash(&self.signing_fields())
    }

    /// Signed fields followed by `R8.x, R8.y, S`; zeros when unsigned.
    pub fn circuit_fields(&self) -> Vec<Fr> {
        let mut fields = self.signing_fields();
        match &self.signature {
            Some(signature) => fields.extend([signature.r8.x, signature.r8.y, signature.s]),
            None => fields.extend([Fr::ZERO; 3]),
        }
        fields
    }
}

/// Wei amounts as decimal strings; plain JSON integers are accepted on input.
pub mod serde_wei {
    use serde::{de, Deserialize, Deserializer, Serializer};

    use super::Wei;

    pub fn serialize<S: Serializer>(value: &Wei, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Wei, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
            Raw::Number(number) => Ok(number as Wei),
        }
    }
}
