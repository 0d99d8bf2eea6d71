//! Transactions and unspent outputs

use crate::core::Sha256Hash;
use crate::error::Result;
use crate::protocol::encoding::{
    ensure_remaining, read_compact_size, read_hash, read_var_bytes, write_compact_size,
    write_var_bytes,
};
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Persistence-assigned identifier of a stored transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

/// Persistence-assigned identifier of a stored transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionOutputId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to one output of a transaction (an outpoint)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionOutputIdentifier {
    /// Hash of the transaction holding the output
    pub transaction_hash: Sha256Hash,
    /// Index of the output within that transaction
    pub output_index: u32,
}

impl TransactionOutputIdentifier {
    /// Create a new outpoint
    pub fn new(transaction_hash: Sha256Hash, output_index: u32) -> Self {
        Self {
            transaction_hash,
            output_index,
        }
    }

    /// Serialize as hash followed by little-endian index
    pub fn to_bytes(&self) -> [u8; 36] {
        let mut bytes = [0u8; 36];
        bytes[..32].copy_from_slice(self.transaction_hash.as_bytes());
        bytes[32..].copy_from_slice(&self.output_index.to_le_bytes());
        bytes
    }
}

impl fmt::Display for TransactionOutputIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transaction_hash, self.output_index)
    }
}

/// A transaction input spending a previous output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionInput {
    /// The output being spent
    pub previous_output: TransactionOutputIdentifier,
    /// Unlocking script
    pub unlocking_script: Vec<u8>,
    /// Sequence number
    pub sequence: u32,
}

/// A transaction output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    /// Amount in the smallest currency unit
    pub amount: u64,
    /// Locking script
    pub locking_script: Vec<u8>,
}

/// A transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction version
    pub version: i32,
    /// Inputs
    pub inputs: Vec<TransactionInput>,
    /// Outputs
    pub outputs: Vec<TransactionOutput>,
    /// Lock time
    pub lock_time: u32,
}

impl Transaction {
    /// Serialize to the wire form
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf);
        buf
    }

    /// Append the wire form to `buf`
    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_i32_le(self.version);
        write_compact_size(buf, self.inputs.len() as u64);
        for input in &self.inputs {
            buf.put_slice(&input.previous_output.to_bytes());
            write_var_bytes(buf, &input.unlocking_script);
            buf.put_u32_le(input.sequence);
        }
        write_compact_size(buf, self.outputs.len() as u64);
        for output in &self.outputs {
            buf.put_u64_le(output.amount);
            write_var_bytes(buf, &output.locking_script);
        }
        buf.put_u32_le(self.lock_time);
    }

    /// Read one transaction from the front of `buf`
    pub fn read_from(buf: &mut impl Buf) -> Result<Self> {
        ensure_remaining(buf, 4, "transaction version")?;
        let version = buf.get_i32_le();

        let input_count = read_compact_size(buf)?;
        let mut inputs = Vec::with_capacity(input_count.min(1024) as usize);
        for _ in 0..input_count {
            let transaction_hash = read_hash(buf)?;
            ensure_remaining(buf, 4, "output index")?;
            let output_index = buf.get_u32_le();
            let unlocking_script = read_var_bytes(buf)?;
            ensure_remaining(buf, 4, "sequence")?;
            let sequence = buf.get_u32_le();
            inputs.push(TransactionInput {
                previous_output: TransactionOutputIdentifier::new(transaction_hash, output_index),
                unlocking_script,
                sequence,
            });
        }

        let output_count = read_compact_size(buf)?;
        let mut outputs = Vec::with_capacity(output_count.min(1024) as usize);
        for _ in 0..output_count {
            ensure_remaining(buf, 8, "amount")?;
            let amount = buf.get_u64_le();
            let locking_script = read_var_bytes(buf)?;
            outputs.push(TransactionOutput {
                amount,
                locking_script,
            });
        }

        ensure_remaining(buf, 4, "lock time")?;
        let lock_time = buf.get_u32_le();

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    /// Compute the transaction hash
    pub fn hash(&self) -> Sha256Hash {
        Sha256Hash::digest(&self.to_bytes())
    }

    /// Outpoints created by this transaction
    pub fn output_identifiers(&self) -> impl Iterator<Item = TransactionOutputIdentifier> + '_ {
        let hash = self.hash();
        (0..self.outputs.len() as u32).map(move |index| TransactionOutputIdentifier::new(hash, index))
    }
}

/// An unspent output as held in the UTXO view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentTransactionOutput {
    /// Amount in the smallest currency unit
    pub amount: u64,
    /// Locking script
    pub locking_script: Vec<u8>,
    /// Height of the block that confirmed it, `None` while unconfirmed
    pub block_height: Option<u64>,
    /// Whether the output was created by a coinbase transaction
    pub is_coinbase: bool,
}

impl UnspentTransactionOutput {
    /// Build from a transaction output
    pub fn from_output(output: &TransactionOutput, block_height: Option<u64>, is_coinbase: bool) -> Self {
        Self {
            amount: output.amount,
            locking_script: output.locking_script.clone(),
            block_height,
            is_coinbase,
        }
    }
}
