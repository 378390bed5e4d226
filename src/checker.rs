//! Signature checking collaborators.
//!
//! The interpreter never touches transactions or elliptic curves itself; it
//! hands signatures to a [`SignatureChecker`]. [`TransactionSignatureChecker`]
//! is the production implementation, tests substitute their own.

use std::sync::OnceLock;

use bitcoin::{
    hashes::Hash,
    opcodes::all,
    secp256k1::{self, ecdsa::Signature, Message, PublicKey, Secp256k1},
    sighash::SighashCache,
    Transaction,
};

use crate::{
    interpreter::ScriptFlags,
    script::{Instruction, Script},
    VERIFY_EVEN_S, VERIFY_STRICTENC,
};

const SIGHASH_ALL: u8 = 0x01;
const SIGHASH_SINGLE: u8 = 0x03;
const SIGHASH_ANYONECANPAY: u8 = 0x80;

type VerificationContext = Secp256k1<secp256k1::VerifyOnly>;

static SECP256K1: OnceLock<VerificationContext> = OnceLock::new();

fn with_secp256k1_verification_ctx<R>(f: impl FnOnce(&VerificationContext) -> R) -> R {
    f(SECP256K1.get_or_init(Secp256k1::verification_only))
}

/// Verifies signatures on behalf of `OP_CHECKSIG` and `OP_CHECKMULTISIG`.
pub trait SignatureChecker {
    /// Checks `signature` (DER followed by the hash type byte) against
    /// `pubkey` over `script_code`.
    ///
    /// `script_code` already has the signature pushes removed. Returns false
    /// for anything that does not verify, including unparsable input.
    fn check_sig(&self, signature: &[u8], pubkey: &[u8], script_code: &Script) -> bool;

    fn is_canonical_signature(&self, signature: &[u8], flags: ScriptFlags) -> bool {
        is_canonical_signature(signature, flags)
    }

    fn is_canonical_pubkey(&self, pubkey: &[u8], flags: ScriptFlags) -> bool {
        is_canonical_pubkey(pubkey, flags)
    }
}

/// Checks ECDSA signatures against the legacy sighash of one transaction input.
pub struct TransactionSignatureChecker<'tx> {
    sighash_cache: SighashCache<&'tx Transaction>,
    input_index: usize,
    sighash_type: u32,
}

impl<'tx> TransactionSignatureChecker<'tx> {
    /// `sighash_type` of `0` accepts whatever hash type each signature
    /// carries; any other value must match the signature's last byte.
    pub fn new(tx: &'tx Transaction, input_index: usize, sighash_type: u32) -> Self {
        Self {
            sighash_cache: SighashCache::new(tx),
            input_index,
            sighash_type,
        }
    }
}

impl SignatureChecker for TransactionSignatureChecker<'_> {
    fn check_sig(&self, signature: &[u8], pubkey: &[u8], script_code: &Script) -> bool {
        let Ok(pubkey) = PublicKey::from_slice(pubkey) else {
            return false;
        };
        let Some((&hash_type, der)) = signature.split_last() else {
            return false;
        };
        let hash_type = u32::from(hash_type);
        if self.sighash_type != 0 && self.sighash_type != hash_type {
            return false;
        }
        let Ok(mut signature) = Signature::from_der_lax(der) else {
            return false;
        };
        signature.normalize_s();

        let script_code = strip_code_separators(script_code);
        let Ok(sighash) = self.sighash_cache.legacy_signature_hash(
            self.input_index,
            bitcoin::Script::from_bytes(script_code.as_bytes()),
            hash_type,
        ) else {
            return false;
        };
        let message = Message::from_digest(sighash.to_byte_array());

        with_secp256k1_verification_ctx(|secp| {
            secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
        })
    }
}

/// Copies `script` without its `OP_CODESEPARATOR` instructions.
///
/// Bytes after an undecodable push are kept verbatim.
fn strip_code_separators(script: &Script) -> Script {
    let bytes = script.as_bytes();
    let mut stripped = Vec::with_capacity(bytes.len());
    let mut instructions = script.instructions();
    let mut start = 0usize;

    while let Some(instruction) = instructions.next() {
        let end = instructions.position();
        match instruction {
            Ok(Instruction::Op(op)) if op == all::OP_CODESEPARATOR => {}
            Ok(_) => stripped.extend_from_slice(&bytes[start..end]),
            Err(_) => {
                stripped.extend_from_slice(&bytes[start..]);
                break;
            }
        }
        start = end;
    }

    Script::from(stripped)
}

/// Strict DER signature encoding with a defined hash type.
///
/// Always true unless `VERIFY_STRICTENC` is set. With `VERIFY_EVEN_S` the S
/// value must also be even.
pub fn is_canonical_signature(sig: &[u8], flags: ScriptFlags) -> bool {
    if !flags.contains(VERIFY_STRICTENC) {
        return true;
    }

    // 0x30 len 0x02 len_r R 0x02 len_s S hashtype
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    let hash_type = sig[sig.len() - 1] & !SIGHASH_ANYONECANPAY;
    if !(SIGHASH_ALL..=SIGHASH_SINGLE).contains(&hash_type) {
        return false;
    }
    if sig[0] != 0x30 || usize::from(sig[1]) != sig.len() - 3 {
        return false;
    }

    let len_r = usize::from(sig[3]);
    if 5 + len_r >= sig.len() {
        return false;
    }
    let len_s = usize::from(sig[5 + len_r]);
    if len_r + len_s + 7 != sig.len() {
        return false;
    }

    let r = 4;
    if sig[r - 2] != 0x02 || len_r == 0 {
        return false;
    }
    if sig[r] & 0x80 != 0 {
        return false;
    }
    if len_r > 1 && sig[r] == 0x00 && sig[r + 1] & 0x80 == 0 {
        return false;
    }

    let s = 6 + len_r;
    if sig[s - 2] != 0x02 || len_s == 0 {
        return false;
    }
    if sig[s] & 0x80 != 0 {
        return false;
    }
    if len_s > 1 && sig[s] == 0x00 && sig[s + 1] & 0x80 == 0 {
        return false;
    }

    if flags.contains(VERIFY_EVEN_S) && sig[s + len_s - 1] & 1 != 0 {
        return false;
    }

    true
}

/// SEC public key encoding: 33-byte compressed or 65-byte uncompressed.
///
/// Always true unless `VERIFY_STRICTENC` is set.
pub fn is_canonical_pubkey(pubkey: &[u8], flags: ScriptFlags) -> bool {
    if !flags.contains(VERIFY_STRICTENC) {
        return true;
    }
    if pubkey.len() < 33 {
        return false;
    }
    match pubkey[0] {
        0x04 => pubkey.len() == 65,
        0x02 | 0x03 => pubkey.len() == 33,
        _ => false,
    }
}
