//! Pure-Rust verifier for legacy (pre-segwit) Bitcoin scripts.
//!
//! A spend is valid when the unlocking script (scriptSig) followed by the
//! locking script (scriptPubKey) runs without violating any rule and leaves a
//! true value on top of the stack. Everything here is synchronous and
//! allocation-bounded by the consensus limits.
//!
//! Pay-to-script-hash redemption is not evaluated: `VERIFY_P2SH` is accepted
//! but only the outer scripts are run.

mod checker;
mod interpreter;
mod num;
pub mod opcodes;
mod script;
mod stack;
mod tx;

pub use checker::{
    is_canonical_pubkey, is_canonical_signature, SignatureChecker, TransactionSignatureChecker,
};
pub use interpreter::{
    evaluate, ExecStats, Interpreter, ScriptError, ScriptFlags, MAX_OPS_PER_SCRIPT,
    MAX_PUBKEYS_PER_MULTISIG, MAX_STACK_SIZE,
};
pub use num::{cast_to_bool, decode_num, encode_num, parse_scriptnum, MAX_NUM_SIZE};
pub use script::{
    find_and_delete, push_data, Builder, DecodeError, Instruction, InstructionIndices,
    Instructions, ParseScriptError, PushDataError, Script, MAX_SCRIPT_ELEMENT_SIZE,
    MAX_SCRIPT_SIZE,
};
pub use stack::ScriptStack;
pub use tx::TransactionContext;

use bitcoin::Transaction;
use log::debug;

/// Do not enable any verification.
pub const VERIFY_NONE: u32 = 0;
/// Accepted for compatibility; redeem scripts are not evaluated.
pub const VERIFY_P2SH: u32 = 1 << 0;
/// Require strict DER signatures with a defined hash type and SEC public keys.
pub const VERIFY_STRICTENC: u32 = 1 << 1;
/// Require an even S value in signatures. Only checked together with
/// `VERIFY_STRICTENC`.
pub const VERIFY_EVEN_S: u32 = 1 << 2;
/// Accepted for compatibility; there is no signature cache.
pub const VERIFY_NOCACHE: u32 = 1 << 3;

pub(crate) const SUPPORTED_FLAGS: u32 =
    VERIFY_P2SH | VERIFY_STRICTENC | VERIFY_EVEN_S | VERIFY_NOCACHE;

/// Errors returned by the verification APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The scripts ran and rejected the spend.
    #[error("script verification failed: {0}")]
    Script(#[from] ScriptError),
    /// Unknown bits in the verification flags.
    #[error("script verification flags {0:#x} are invalid")]
    InvalidFlags(u32),
    #[error("input index {index} out of range for a transaction with {inputs} inputs")]
    TxIndex { index: usize, inputs: usize },
    #[error("an error deserializing the spending transaction")]
    TxDeserialize,
    #[error("spending transaction is not canonically encoded")]
    TxSizeMismatch,
}

/// Verifies that `script_sig` satisfies `script_pubkey` for input
/// `input_index` of `tx`.
///
/// `sighash_type` of `0` accepts the hash type carried by each signature;
/// any other value must match it exactly. Invalid flags fail verification.
pub fn verify(
    script_sig: &Script,
    script_pubkey: &Script,
    tx: &Transaction,
    input_index: usize,
    flags: u32,
    sighash_type: u32,
) -> bool {
    verify_with_details(script_sig, script_pubkey, tx, input_index, flags, sighash_type).is_ok()
}

/// Same as [`verify`] but reports why verification failed.
pub fn verify_with_details(
    script_sig: &Script,
    script_pubkey: &Script,
    tx: &Transaction,
    input_index: usize,
    flags: u32,
    sighash_type: u32,
) -> Result<(), Error> {
    let flags = ScriptFlags::from_bits(flags)?;
    let checker = TransactionSignatureChecker::new(tx, input_index, sighash_type);
    verify_with_checker(script_sig, script_pubkey, &checker, flags)
}

/// Runs the unlocking and locking scripts with a caller supplied checker.
pub fn verify_with_checker(
    script_sig: &Script,
    script_pubkey: &Script,
    checker: &dyn SignatureChecker,
    flags: ScriptFlags,
) -> Result<(), Error> {
    let mut interpreter = Interpreter::new(checker, flags);
    let mut stack = ScriptStack::new();

    if let Err(err) = interpreter.eval_script(&mut stack, script_sig) {
        debug!("unlocking script failed: {err}");
        return Err(err.into());
    }
    if let Err(err) = interpreter.eval_script(&mut stack, script_pubkey) {
        debug!("locking script failed: {err}");
        return Err(err.into());
    }

    match stack.last() {
        Some(top) if cast_to_bool(top) => Ok(()),
        _ => {
            debug!("final stack of depth {} is not true", stack.len());
            Err(ScriptError::EvalFalse.into())
        }
    }
}

/// Verifies input `input_index` of a serialized transaction against the
/// locking script of the output it spends.
///
/// Hash types are taken from the signatures themselves.
pub fn verify_spend(
    spent_output_script: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
    flags: u32,
) -> Result<(), Error> {
    let tx_ctx = TransactionContext::parse(spending_transaction)?;
    let script_sig = tx_ctx.script_sig(input_index)?;
    let script_pubkey = Script::from(spent_output_script);
    verify_with_details(&script_sig, &script_pubkey, tx_ctx.tx(), input_index, flags, 0)
}
