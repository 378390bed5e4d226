//! Transaction parsing for the raw-bytes verification entry point.

use bitcoin::{consensus, Transaction};

use crate::{script::Script, Error};

/// A transaction parsed from wire bytes.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    tx: Transaction,
}

impl TransactionContext {
    /// Parses a transaction and reserializes it to guarantee canonical encoding.
    pub fn parse(tx_bytes: &[u8]) -> Result<Self, Error> {
        let tx: Transaction = consensus::deserialize(tx_bytes).map_err(|_| Error::TxDeserialize)?;

        let canonical = consensus::serialize(&tx);
        if canonical.len() != tx_bytes.len() {
            return Err(Error::TxSizeMismatch);
        }

        Ok(Self { tx })
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Ensures `input_index` points to an existing transaction input.
    pub fn ensure_input_index(&self, input_index: usize) -> Result<(), Error> {
        if input_index >= self.tx.input.len() {
            Err(Error::TxIndex {
                index: input_index,
                inputs: self.tx.input.len(),
            })
        } else {
            Ok(())
        }
    }

    /// Unlocking script of input `input_index`.
    pub fn script_sig(&self, input_index: usize) -> Result<Script, Error> {
        self.ensure_input_index(input_index)?;
        Ok(Script::from(self.tx.input[input_index].script_sig.as_bytes()))
    }
}
