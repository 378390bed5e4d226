//! Script execution engine.

use bitcoin::{
    hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash},
    opcodes::{all, Opcode},
    Transaction,
};
use log::trace;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::{
    checker::{SignatureChecker, TransactionSignatureChecker},
    num::{bool_to_num, cast_to_bool, parse_scriptnum, MAX_NUM_SIZE},
    opcodes,
    script::{find_and_delete, push_data, Instruction, Script, MAX_SCRIPT_ELEMENT_SIZE, MAX_SCRIPT_SIZE},
    stack::ScriptStack,
    Error, SUPPORTED_FLAGS,
};

/// Maximum combined size of the main and alt stacks.
pub const MAX_STACK_SIZE: usize = 1000;
/// Maximum number of non-push opcodes per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;
/// Maximum number of keys in a CHECKMULTISIG.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

/// Reason a script failed.
///
/// This is diagnostic only; consensus treats every variant the same.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ScriptError {
    #[error("script evaluated without error but finished with a false/empty top stack element")]
    EvalFalse,
    #[error("OP_RETURN was encountered")]
    OpReturn,
    #[error("script is too big")]
    ScriptSize,
    #[error("push value size limit exceeded")]
    PushSize,
    #[error("operation limit exceeded")]
    OpCount,
    #[error("stack size limit exceeded")]
    StackSize,
    #[error("signature count negative or greater than pubkey count")]
    SigCount,
    #[error("pubkey count negative or limit exceeded")]
    PubkeyCount,
    #[error("script failed an OP_VERIFY operation")]
    Verify,
    #[error("script failed an OP_EQUALVERIFY operation")]
    EqualVerify,
    #[error("script failed an OP_CHECKSIGVERIFY operation")]
    CheckSigVerify,
    #[error("script failed an OP_CHECKMULTISIGVERIFY operation")]
    CheckMultiSigVerify,
    #[error("script failed an OP_NUMEQUALVERIFY operation")]
    NumEqualVerify,
    #[error("opcode missing or not understood")]
    BadOpcode,
    #[error("attempted to use a disabled opcode")]
    DisabledOpcode,
    #[error("opcode is not in the opcode table")]
    UnknownOpcode,
    #[error("operation not valid with the current stack size")]
    InvalidStackOperation,
    #[error("operation not valid with the current altstack size")]
    InvalidAltstackOperation,
    #[error("invalid OP_IF construction")]
    UnbalancedConditional,
    #[error("numeric operand longer than four bytes")]
    NumOverflow,
    #[error("push runs past the end of the script")]
    MalformedPush,
}

/// Validated verification flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    pub fn from_bits(bits: u32) -> Result<Self, Error> {
        if bits & !SUPPORTED_FLAGS != 0 {
            return Err(Error::InvalidFlags(bits));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, flag: u32) -> bool {
        self.0 & flag == flag
    }
}

/// Counters from the most recent [`Interpreter::eval_script`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    /// Instructions decoded, including ones in unexecuted branches.
    pub steps: usize,
    /// Largest combined main and alt stack depth observed.
    pub max_stack_depth: usize,
}

pub struct Interpreter<'a> {
    checker: &'a dyn SignatureChecker,
    flags: ScriptFlags,
    exec_stack: Vec<bool>,
    op_count: usize,
    stats: ExecStats,
}

impl<'a> Interpreter<'a> {
    pub fn new(checker: &'a dyn SignatureChecker, flags: ScriptFlags) -> Self {
        Self {
            checker,
            flags,
            exec_stack: Vec::new(),
            op_count: 0,
            stats: ExecStats::default(),
        }
    }

    pub fn flags(&self) -> ScriptFlags {
        self.flags
    }

    pub fn stats(&self) -> ExecStats {
        self.stats
    }

    /// Runs `script` against `stack`.
    ///
    /// Branch state, the op counter and the alt stack start fresh on every
    /// call; only `stack` carries over between calls. On failure `stack` is
    /// left in whatever state the failing instruction produced.
    pub fn eval_script(&mut self, stack: &mut ScriptStack, script: &Script) -> Result<(), ScriptError> {
        self.exec_stack.clear();
        self.op_count = 0;
        self.stats = ExecStats::default();

        if script.len() > MAX_SCRIPT_SIZE {
            trace!("script of {} bytes exceeds the size limit", script.len());
            return Err(ScriptError::ScriptSize);
        }

        let mut altstack = ScriptStack::new();
        let mut code_separator = 0usize;
        let mut instructions = script.instructions();

        loop {
            let position = instructions.position();
            let Some(instruction) = instructions.next() else {
                break;
            };
            self.stats.steps += 1;
            let should_execute = self.exec_stack.iter().all(|&cond| cond);

            let step = match instruction {
                Ok(Instruction::PushBytes(data)) => {
                    if data.len() > MAX_SCRIPT_ELEMENT_SIZE {
                        Err(ScriptError::PushSize)
                    } else {
                        if should_execute {
                            stack.push(data.to_vec());
                        }
                        Ok(())
                    }
                }
                Ok(Instruction::Op(op)) => self.step_opcode(
                    stack,
                    &mut altstack,
                    op,
                    script,
                    &mut code_separator,
                    instructions.position(),
                    should_execute,
                ),
                Err(_) => Err(ScriptError::MalformedPush),
            };

            let result = step.and_then(|()| {
                let depth = stack.len() + altstack.len();
                self.ensure_stack_limit(depth)?;
                self.stats.max_stack_depth = self.stats.max_stack_depth.max(depth);
                Ok(())
            });
            if let Err(err) = result {
                trace!(
                    "opcode {:#04x} at byte {position} failed: {err}",
                    script.as_bytes()[position]
                );
                return Err(err);
            }
        }

        if !self.exec_stack.is_empty() {
            return Err(ScriptError::UnbalancedConditional);
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn step_opcode(
        &mut self,
        stack: &mut ScriptStack,
        altstack: &mut ScriptStack,
        op: Opcode,
        script: &Script,
        code_separator: &mut usize,
        next_position: usize,
        should_execute: bool,
    ) -> Result<(), ScriptError> {
        let opcode = op.to_u8();

        if !opcodes::is_known(opcode) {
            return Err(ScriptError::UnknownOpcode);
        }
        if opcode > all::OP_PUSHNUM_16.to_u8() {
            self.add_ops(1)?;
        }
        if opcodes::is_disabled(op) {
            return Err(ScriptError::DisabledOpcode);
        }

        if opcodes::is_conditional(op) {
            self.handle_control_flow(stack, op, should_execute)
        } else if !should_execute {
            Ok(())
        } else if op == all::OP_CODESEPARATOR {
            *code_separator = next_position;
            Ok(())
        } else {
            self.execute_opcode(stack, altstack, op, script, *code_separator)
        }
    }

    fn add_ops(&mut self, count: usize) -> Result<(), ScriptError> {
        self.op_count += count;
        if self.op_count > MAX_OPS_PER_SCRIPT {
            Err(ScriptError::OpCount)
        } else {
            Ok(())
        }
    }

    fn ensure_stack_limit(&self, depth: usize) -> Result<(), ScriptError> {
        if depth > MAX_STACK_SIZE {
            Err(ScriptError::StackSize)
        } else {
            Ok(())
        }
    }

    fn handle_control_flow(
        &mut self,
        stack: &mut ScriptStack,
        op: Opcode,
        should_execute: bool,
    ) -> Result<(), ScriptError> {
        use all::*;

        match op {
            OP_IF | OP_NOTIF => {
                let mut value = false;
                if should_execute {
                    let condition = stack
                        .pop_bytes()
                        .map_err(|_| ScriptError::UnbalancedConditional)?;
                    value = cast_to_bool(&condition);
                    if op == OP_NOTIF {
                        value = !value;
                    }
                }
                self.exec_stack.push(value);
            }
            OP_ELSE => {
                let Some(top) = self.exec_stack.last_mut() else {
                    return Err(ScriptError::UnbalancedConditional);
                };
                *top = !*top;
            }
            OP_ENDIF => {
                if self.exec_stack.pop().is_none() {
                    return Err(ScriptError::UnbalancedConditional);
                }
            }
            // OP_VERIF and OP_VERNOTIF
            _ => return Err(ScriptError::BadOpcode),
        }

        Ok(())
    }

    fn execute_opcode(
        &mut self,
        stack: &mut ScriptStack,
        altstack: &mut ScriptStack,
        op: Opcode,
        script: &Script,
        code_separator: usize,
    ) -> Result<(), ScriptError> {
        use all::*;

        let opcode = op.to_u8();
        if (OP_PUSHNUM_1.to_u8()..=OP_PUSHNUM_16.to_u8()).contains(&opcode) {
            let value = opcode - OP_PUSHNUM_1.to_u8() + 1;
            stack.push_num(&BigInt::from(value));
            return Ok(());
        }

        match op {
            OP_PUSHNUM_NEG1 => stack.push_num(&BigInt::from(-1)),
            OP_NOP | OP_NOP1 | OP_CLTV | OP_CSV | OP_NOP4 | OP_NOP5 | OP_NOP6 | OP_NOP7
            | OP_NOP8 | OP_NOP9 | OP_NOP10 => {}
            OP_VERIFY => self.op_verify_with_code(stack, ScriptError::Verify)?,
            OP_RETURN => return Err(ScriptError::OpReturn),

            OP_TOALTSTACK => altstack.push(stack.pop_bytes()?),
            OP_FROMALTSTACK => {
                let value = altstack
                    .pop_bytes()
                    .map_err(|_| ScriptError::InvalidAltstackOperation)?;
                stack.push(value);
            }
            OP_2DROP => {
                stack.require(2)?;
                stack.pop_bytes()?;
                stack.pop_bytes()?;
            }
            OP_2DUP => {
                stack.require(2)?;
                let first = stack.peek(1)?.to_vec();
                let second = stack.peek(0)?.to_vec();
                stack.push(first);
                stack.push(second);
            }
            OP_3DUP => {
                stack.require(3)?;
                let first = stack.peek(2)?.to_vec();
                let second = stack.peek(1)?.to_vec();
                let third = stack.peek(0)?.to_vec();
                stack.push(first);
                stack.push(second);
                stack.push(third);
            }
            OP_2OVER => {
                stack.require(4)?;
                let first = stack.peek(3)?.to_vec();
                let second = stack.peek(2)?.to_vec();
                stack.push(first);
                stack.push(second);
            }
            OP_2ROT => {
                stack.require(6)?;
                let first = stack.remove(5)?;
                let second = stack.remove(4)?;
                stack.push(first);
                stack.push(second);
            }
            OP_2SWAP => {
                stack.require(4)?;
                stack.swap(3, 1)?;
                stack.swap(2, 0)?;
            }
            OP_IFDUP => {
                let value = stack.peek(0)?;
                if cast_to_bool(value) {
                    let value = value.to_vec();
                    stack.push(value);
                }
            }
            OP_DEPTH => {
                let depth = BigInt::from(stack.len());
                stack.push_num(&depth);
            }
            OP_DROP => {
                stack.pop_bytes()?;
            }
            OP_DUP => {
                let value = stack.peek(0)?.to_vec();
                stack.push(value);
            }
            OP_NIP => {
                stack.require(2)?;
                stack.remove(1)?;
            }
            OP_OVER => {
                stack.require(2)?;
                let value = stack.peek(1)?.to_vec();
                stack.push(value);
            }
            OP_PICK | OP_ROLL => {
                stack.require(2)?;
                let depth = self
                    .pop_scriptnum(stack)?
                    .to_usize()
                    .filter(|depth| *depth < stack.len())
                    .ok_or(ScriptError::InvalidStackOperation)?;
                let value = if op == OP_PICK {
                    stack.peek(depth)?.to_vec()
                } else {
                    stack.remove(depth)?
                };
                stack.push(value);
            }
            OP_ROT => {
                stack.require(3)?;
                stack.swap(2, 1)?;
                stack.swap(1, 0)?;
            }
            OP_SWAP => {
                stack.require(2)?;
                stack.swap(1, 0)?;
            }
            OP_TUCK => {
                stack.require(2)?;
                let value = stack.peek(0)?.to_vec();
                stack.insert(2, value)?;
            }
            OP_SIZE => {
                let size = BigInt::from(stack.peek(0)?.len());
                stack.push_num(&size);
            }

            OP_EQUAL => self.op_equal(stack)?,
            OP_EQUALVERIFY => {
                self.op_equal(stack)?;
                self.op_verify_with_code(stack, ScriptError::EqualVerify)?;
            }

            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let num = self.pop_scriptnum(stack)?;
                let result = match op {
                    OP_1ADD => num + 1,
                    OP_1SUB => num - 1,
                    OP_NEGATE => -num,
                    OP_ABS => num.abs(),
                    OP_NOT => bool_to_num(num.is_zero()),
                    _ => bool_to_num(!num.is_zero()),
                };
                stack.push_num(&result);
            }
            OP_ADD
            | OP_SUB
            | OP_BOOLAND
            | OP_BOOLOR
            | OP_NUMEQUAL
            | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL
            | OP_LESSTHAN
            | OP_GREATERTHAN
            | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL
            | OP_MIN
            | OP_MAX => {
                stack.require(2)?;
                let b = self.pop_scriptnum(stack)?;
                let a = self.pop_scriptnum(stack)?;
                let result = match op {
                    OP_ADD => a + b,
                    OP_SUB => a - b,
                    OP_BOOLAND => bool_to_num(!a.is_zero() && !b.is_zero()),
                    OP_BOOLOR => bool_to_num(!a.is_zero() || !b.is_zero()),
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => bool_to_num(a == b),
                    OP_NUMNOTEQUAL => bool_to_num(a != b),
                    OP_LESSTHAN => bool_to_num(a < b),
                    OP_GREATERTHAN => bool_to_num(a > b),
                    OP_LESSTHANOREQUAL => bool_to_num(a <= b),
                    OP_GREATERTHANOREQUAL => bool_to_num(a >= b),
                    OP_MIN => a.min(b),
                    _ => a.max(b),
                };
                stack.push_num(&result);
                if op == OP_NUMEQUALVERIFY {
                    self.op_verify_with_code(stack, ScriptError::NumEqualVerify)?;
                }
            }
            OP_WITHIN => {
                stack.require(3)?;
                let max = self.pop_scriptnum(stack)?;
                let min = self.pop_scriptnum(stack)?;
                let value = self.pop_scriptnum(stack)?;
                stack.push_bool(min <= value && value < max);
            }

            OP_RIPEMD160 => Self::op_hash(stack, |data| ripemd160::Hash::hash(data).to_byte_array().to_vec())?,
            OP_SHA1 => Self::op_hash(stack, |data| sha1::Hash::hash(data).to_byte_array().to_vec())?,
            OP_SHA256 => Self::op_hash(stack, |data| sha256::Hash::hash(data).to_byte_array().to_vec())?,
            OP_HASH160 => Self::op_hash(stack, |data| hash160::Hash::hash(data).to_byte_array().to_vec())?,
            OP_HASH256 => Self::op_hash(stack, |data| sha256d::Hash::hash(data).to_byte_array().to_vec())?,

            OP_CHECKSIG => self.op_checksig(stack, script, code_separator)?,
            OP_CHECKSIGVERIFY => {
                self.op_checksig(stack, script, code_separator)?;
                self.op_verify_with_code(stack, ScriptError::CheckSigVerify)?;
            }
            OP_CHECKMULTISIG => self.op_checkmultisig(stack, script, code_separator)?,
            OP_CHECKMULTISIGVERIFY => {
                self.op_checkmultisig(stack, script, code_separator)?;
                self.op_verify_with_code(stack, ScriptError::CheckMultiSigVerify)?;
            }

            // OP_RESERVED, OP_VER, OP_RESERVED1, OP_RESERVED2, OP_INVALIDOPCODE
            _ => return Err(ScriptError::BadOpcode),
        }

        Ok(())
    }

    fn op_hash(stack: &mut ScriptStack, digest: impl FnOnce(&[u8]) -> Vec<u8>) -> Result<(), ScriptError> {
        let data = stack.pop_bytes()?;
        stack.push(digest(&data));
        Ok(())
    }

    fn op_equal(&mut self, stack: &mut ScriptStack) -> Result<(), ScriptError> {
        stack.require(2)?;
        let a = stack.pop_bytes()?;
        let b = stack.pop_bytes()?;
        stack.push_bool(a == b);
        Ok(())
    }

    fn op_verify_with_code(&mut self, stack: &mut ScriptStack, error: ScriptError) -> Result<(), ScriptError> {
        let value = stack.pop_bytes()?;
        if !cast_to_bool(&value) {
            return Err(error);
        }
        Ok(())
    }

    fn pop_scriptnum(&mut self, stack: &mut ScriptStack) -> Result<BigInt, ScriptError> {
        let bytes = stack.pop_bytes()?;
        parse_scriptnum(&bytes, MAX_NUM_SIZE)
    }

    /// Script code seen by signature checks: everything after the last
    /// executed OP_CODESEPARATOR.
    fn script_code(script: &Script, code_separator: usize) -> Script {
        Script::from(&script.as_bytes()[code_separator..])
    }

    fn check_signature(&self, sig: &[u8], pubkey: &[u8], script_code: &Script) -> bool {
        self.checker.is_canonical_signature(sig, self.flags)
            && self.checker.is_canonical_pubkey(pubkey, self.flags)
            && self.checker.check_sig(sig, pubkey, script_code)
    }

    fn op_checksig(
        &mut self,
        stack: &mut ScriptStack,
        script: &Script,
        code_separator: usize,
    ) -> Result<(), ScriptError> {
        stack.require(2)?;
        let pubkey = stack.pop_bytes()?;
        let sig = stack.pop_bytes()?;

        let script_code = remove_signature(Self::script_code(script, code_separator), &sig);
        let success = self.check_signature(&sig, &pubkey, &script_code);
        stack.push_bool(success);
        Ok(())
    }

    fn op_checkmultisig(
        &mut self,
        stack: &mut ScriptStack,
        script: &Script,
        code_separator: usize,
    ) -> Result<(), ScriptError> {
        let n_keys = self
            .pop_scriptnum(stack)?
            .to_usize()
            .filter(|n| *n <= MAX_PUBKEYS_PER_MULTISIG)
            .ok_or(ScriptError::PubkeyCount)?;
        self.add_ops(n_keys)?;
        stack.require(n_keys + 1)?;

        let mut pubkeys = Vec::with_capacity(n_keys);
        for _ in 0..n_keys {
            pubkeys.push(stack.pop_bytes()?);
        }

        let n_sigs = self
            .pop_scriptnum(stack)?
            .to_usize()
            .filter(|n| *n <= n_keys)
            .ok_or(ScriptError::SigCount)?;
        // One extra element is consumed beyond the signatures.
        stack.require(n_sigs + 1)?;

        let mut sigs = Vec::with_capacity(n_sigs);
        for _ in 0..n_sigs {
            sigs.push(stack.pop_bytes()?);
        }
        stack.pop_bytes()?;

        let mut script_code = Self::script_code(script, code_separator);
        for sig in &sigs {
            script_code = remove_signature(script_code, sig);
        }

        // Keys and signatures are both consumed from the top down, so a
        // signature can only match a key that sits at or below the key that
        // matched the previous signature.
        let mut success = true;
        let mut sig_index = 0usize;
        let mut key_index = 0usize;
        while success && sig_index < sigs.len() {
            if self.check_signature(&sigs[sig_index], &pubkeys[key_index], &script_code) {
                sig_index += 1;
            }
            key_index += 1;

            if sigs.len() - sig_index > pubkeys.len() - key_index {
                success = false;
            }
        }

        stack.push_bool(success);
        Ok(())
    }
}

/// Removes every push of `sig` from `script_code`.
fn remove_signature(script_code: Script, sig: &[u8]) -> Script {
    let mut needle = Vec::with_capacity(sig.len() + 5);
    if push_data(&mut needle, sig).is_err() {
        return script_code;
    }
    find_and_delete(&script_code, &needle).0
}

/// Runs `script` on `stack` with signatures checked against input
/// `input_index` of `tx`.
///
/// Returns false on any rule violation. `stack` holds the final state either
/// way.
pub fn evaluate(
    script: &Script,
    stack: &mut ScriptStack,
    tx: &Transaction,
    input_index: usize,
    flags: ScriptFlags,
    sighash_type: u32,
) -> bool {
    let checker = TransactionSignatureChecker::new(tx, input_index, sighash_type);
    Interpreter::new(&checker, flags).eval_script(stack, script).is_ok()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::{num::encode_num, VERIFY_NONE, VERIFY_STRICTENC};

    /// Accepts a signature iff its bytes equal `b"sig:" ++ pubkey`, and
    /// records the script code of every call.
    #[derive(Default)]
    struct MockChecker {
        seen: RefCell<Vec<Script>>,
    }

    impl MockChecker {
        fn sig_for(pubkey: &[u8]) -> Vec<u8> {
            let mut sig = b"sig:".to_vec();
            sig.extend_from_slice(pubkey);
            sig
        }
    }

    impl SignatureChecker for MockChecker {
        fn check_sig(&self, signature: &[u8], pubkey: &[u8], script_code: &Script) -> bool {
            self.seen.borrow_mut().push(script_code.clone());
            signature == Self::sig_for(pubkey).as_slice()
        }
    }

    fn parse(text: &str) -> Script {
        text.parse().expect("valid script text")
    }

    fn run_with(checker: &dyn SignatureChecker, text: &str, initial: Vec<Vec<u8>>) -> (Result<(), ScriptError>, Vec<Vec<u8>>) {
        let flags = ScriptFlags::from_bits(VERIFY_NONE).unwrap();
        let mut interpreter = Interpreter::new(checker, flags);
        let mut stack = ScriptStack::from_items(initial);
        let result = interpreter.eval_script(&mut stack, &parse(text));
        (result, stack.into_items())
    }

    fn run(text: &str) -> (Result<(), ScriptError>, Vec<Vec<u8>>) {
        run_with(&MockChecker::default(), text, Vec::new())
    }

    fn run_ok(text: &str) -> Vec<Vec<u8>> {
        let (result, stack) = run(text);
        assert_eq!(result, Ok(()), "script `{text}`");
        stack
    }

    fn run_err(text: &str) -> ScriptError {
        let (result, _) = run(text);
        result.expect_err(text)
    }

    fn num(value: i64) -> Vec<u8> {
        encode_num(&BigInt::from(value))
    }

    fn nums(values: &[i64]) -> Vec<Vec<u8>> {
        values.iter().map(|v| num(*v)).collect()
    }

    #[test]
    fn adds_small_numbers() {
        assert_eq!(run_ok("OP_2 OP_3 OP_ADD"), vec![vec![0x05]]);
    }

    #[test]
    fn comparison_pushes_false_as_empty() {
        assert_eq!(run_ok("OP_5 OP_3 OP_LESSTHAN"), vec![Vec::<u8>::new()]);
        assert_eq!(run_ok("OP_3 OP_5 OP_LESSTHAN"), vec![vec![0x01]]);
    }

    #[test]
    fn stack_opcode_fixtures() {
        let cases: &[(&str, &[i64])] = &[
            ("OP_1 OP_2 OP_3 OP_4 OP_2DROP", &[1, 2]),
            ("OP_1 OP_2 OP_2DUP", &[1, 2, 1, 2]),
            ("OP_1 OP_2 OP_3 OP_3DUP", &[1, 2, 3, 1, 2, 3]),
            ("OP_1 OP_2 OP_3 OP_4 OP_2OVER", &[1, 2, 3, 4, 1, 2]),
            ("OP_1 OP_2 OP_3 OP_4 OP_5 OP_6 OP_2ROT", &[3, 4, 5, 6, 1, 2]),
            ("OP_1 OP_2 OP_3 OP_4 OP_2SWAP", &[3, 4, 1, 2]),
            ("OP_1 OP_IFDUP", &[1, 1]),
            ("OP_0 OP_IFDUP", &[0]),
            ("OP_1 OP_2 OP_DEPTH", &[1, 2, 2]),
            ("OP_DEPTH", &[0]),
            ("OP_1 OP_2 OP_DROP", &[1]),
            ("OP_1 OP_DUP", &[1, 1]),
            ("OP_1 OP_2 OP_NIP", &[2]),
            ("OP_1 OP_2 OP_OVER", &[1, 2, 1]),
            ("OP_1 OP_2 OP_3 OP_2 OP_PICK", &[1, 2, 3, 1]),
            ("OP_1 OP_2 OP_3 OP_0 OP_PICK", &[1, 2, 3, 3]),
            ("OP_1 OP_2 OP_3 OP_2 OP_ROLL", &[2, 3, 1]),
            ("OP_1 OP_2 OP_3 OP_0 OP_ROLL", &[1, 2, 3]),
            ("OP_1 OP_2 OP_3 OP_ROT", &[2, 3, 1]),
            ("OP_1 OP_2 OP_SWAP", &[2, 1]),
            ("OP_1 OP_2 OP_TUCK", &[2, 1, 2]),
            ("OP_1 OP_TOALTSTACK OP_2 OP_FROMALTSTACK", &[2, 1]),
        ];
        for (text, expected) in cases {
            assert_eq!(run_ok(text), nums(expected), "script `{text}`");
        }
        assert_eq!(run_ok("abcdef OP_SIZE"), vec![vec![0xab, 0xcd, 0xef], num(3)]);
        assert_eq!(run_ok("OP_0 OP_SIZE"), vec![vec![], vec![]]);
    }

    #[test]
    fn stack_opcodes_underflow() {
        for text in [
            "OP_1 OP_2DROP",
            "OP_1 OP_2DUP",
            "OP_1 OP_2 OP_3DUP",
            "OP_1 OP_2 OP_3 OP_2OVER",
            "OP_1 OP_2 OP_3 OP_4 OP_5 OP_2ROT",
            "OP_1 OP_2 OP_3 OP_2SWAP",
            "OP_IFDUP",
            "OP_DROP",
            "OP_DUP",
            "OP_1 OP_NIP",
            "OP_1 OP_OVER",
            "OP_1 OP_2 OP_ROT",
            "OP_1 OP_SWAP",
            "OP_1 OP_TUCK",
            "OP_SIZE",
            "OP_TOALTSTACK",
            "OP_0 OP_PICK",
            "OP_1 OP_2 OP_2 OP_PICK",
            "OP_1 OP_2 OP_2 OP_ROLL",
            "OP_1 OP_1NEGATE OP_PICK",
        ] {
            assert_eq!(run_err(text), ScriptError::InvalidStackOperation, "script `{text}`");
        }
        assert_eq!(run_err("OP_FROMALTSTACK"), ScriptError::InvalidAltstackOperation);
    }

    #[test]
    fn arithmetic() {
        let cases: &[(&str, i64)] = &[
            ("OP_2 OP_1ADD", 3),
            ("OP_2 OP_1SUB", 1),
            ("OP_2 OP_NEGATE", -2),
            ("OP_1NEGATE OP_ABS", 1),
            ("OP_0 OP_NOT", 1),
            ("OP_2 OP_NOT", 0),
            ("OP_2 OP_0NOTEQUAL", 1),
            ("OP_0 OP_0NOTEQUAL", 0),
            ("OP_2 OP_5 OP_SUB", -3),
            ("OP_1 OP_0 OP_BOOLAND", 0),
            ("OP_1 OP_0 OP_BOOLOR", 1),
            ("OP_3 OP_3 OP_NUMEQUAL", 1),
            ("OP_3 OP_4 OP_NUMNOTEQUAL", 1),
            ("OP_3 OP_4 OP_GREATERTHAN", 0),
            ("OP_4 OP_4 OP_LESSTHANOREQUAL", 1),
            ("OP_4 OP_5 OP_GREATERTHANOREQUAL", 0),
            ("OP_4 OP_9 OP_MIN", 4),
            ("OP_4 OP_9 OP_MAX", 9),
            ("OP_2 OP_2 OP_5 OP_WITHIN", 1),
            ("OP_5 OP_2 OP_5 OP_WITHIN", 0),
            ("OP_1 OP_2 OP_5 OP_WITHIN", 0),
        ];
        for (text, expected) in cases {
            assert_eq!(run_ok(text), nums(&[*expected]), "script `{text}`");
        }
    }

    #[test]
    fn negative_zero_is_zero() {
        assert_eq!(run_ok("80 OP_NOT"), nums(&[1]));
        assert_eq!(run_ok("80 OP_0 OP_NUMEQUAL"), nums(&[1]));
    }

    #[test]
    fn results_may_exceed_operand_size() {
        assert_eq!(
            run_ok("ffffff7f OP_DUP OP_ADD"),
            vec![vec![0xfe, 0xff, 0xff, 0xff, 0x00]]
        );
        assert_eq!(run_err("ffffff7f OP_DUP OP_ADD OP_1ADD"), ScriptError::NumOverflow);
        assert_eq!(run_err("0000000001 OP_1ADD"), ScriptError::NumOverflow);
    }

    #[test]
    fn verify_variants() {
        assert_eq!(run_ok("OP_1 OP_VERIFY"), Vec::<Vec<u8>>::new());
        assert_eq!(run_err("OP_0 OP_VERIFY"), ScriptError::Verify);
        assert_eq!(run_err("OP_1 OP_2 OP_EQUALVERIFY"), ScriptError::EqualVerify);
        assert_eq!(run_ok("OP_2 OP_2 OP_EQUALVERIFY"), Vec::<Vec<u8>>::new());
        assert_eq!(run_err("OP_1 OP_2 OP_NUMEQUALVERIFY"), ScriptError::NumEqualVerify);
        assert_eq!(run_ok("0100 OP_1 OP_NUMEQUALVERIFY"), Vec::<Vec<u8>>::new());
        assert_eq!(run_ok("0100 OP_1 OP_EQUAL"), vec![vec![]]);
    }

    #[test]
    fn hashes_replace_the_top_element() {
        let stack = run_ok("OP_0 OP_SHA256");
        assert_eq!(
            stack[0],
            sha256::Hash::hash(&[]).to_byte_array().to_vec()
        );
        assert_eq!(run_ok("OP_0 OP_RIPEMD160")[0].len(), 20);
        assert_eq!(run_ok("OP_0 OP_SHA1")[0].len(), 20);
        assert_eq!(run_ok("OP_0 OP_HASH160")[0].len(), 20);
        assert_eq!(run_ok("OP_0 OP_HASH256")[0].len(), 32);
        assert_eq!(run_err("OP_HASH160"), ScriptError::InvalidStackOperation);
    }

    #[test]
    fn if_else_selects_a_branch() {
        assert_eq!(run_ok("OP_1 OP_IF OP_2 OP_ELSE OP_3 OP_ENDIF"), nums(&[2]));
        assert_eq!(run_ok("OP_0 OP_IF OP_2 OP_ELSE OP_3 OP_ENDIF"), nums(&[3]));
        assert_eq!(run_ok("OP_0 OP_NOTIF OP_2 OP_ELSE OP_3 OP_ENDIF"), nums(&[2]));
        assert_eq!(
            run_ok("OP_1 OP_IF OP_0 OP_IF OP_5 OP_ELSE OP_6 OP_ENDIF OP_ELSE OP_7 OP_ENDIF"),
            nums(&[6])
        );
        assert_eq!(run_ok("OP_1 OP_IF OP_ELSE OP_ELSE OP_4 OP_ENDIF"), nums(&[4]));
        assert_eq!(run_ok("OP_0 OP_IF OP_RETURN OP_ENDIF OP_1"), nums(&[1]));
    }

    #[test]
    fn unbalanced_conditionals_fail() {
        assert_eq!(run_err("OP_1 OP_IF"), ScriptError::UnbalancedConditional);
        assert_eq!(run_err("OP_ELSE"), ScriptError::UnbalancedConditional);
        assert_eq!(run_err("OP_ENDIF"), ScriptError::UnbalancedConditional);
        assert_eq!(run_err("OP_IF OP_ENDIF"), ScriptError::UnbalancedConditional);
    }

    #[test]
    fn disabled_and_unknown_opcodes_fail_even_when_skipped() {
        assert_eq!(run_err("OP_0 OP_IF OP_CAT OP_ENDIF"), ScriptError::DisabledOpcode);
        assert_eq!(run_err("OP_0 OP_IF OP_MUL OP_ENDIF"), ScriptError::DisabledOpcode);
        assert_eq!(run_err("OP_0 OP_IF OP_VERIF OP_ENDIF"), ScriptError::BadOpcode);
        assert_eq!(run_err("OP_0 OP_IF OP_VERNOTIF OP_ENDIF"), ScriptError::BadOpcode);

        let script = Script::from(vec![0x00, 0x63, 0xba, 0x68, 0x51]);
        let checker = MockChecker::default();
        let flags = ScriptFlags::default();
        let mut stack = ScriptStack::new();
        assert_eq!(
            Interpreter::new(&checker, flags).eval_script(&mut stack, &script),
            Err(ScriptError::UnknownOpcode)
        );
    }

    #[test]
    fn reserved_opcodes_fail_only_when_executed() {
        for op in [
            "OP_RESERVED",
            "OP_VER",
            "OP_RESERVED1",
            "OP_RESERVED2",
            "OP_SMALLDATA",
            "OP_PUBKEYHASH",
            "OP_PUBKEY",
            "OP_INVALIDOPCODE",
        ] {
            assert_eq!(run_err(&format!("OP_1 {op}")), ScriptError::BadOpcode, "{op}");
            assert_eq!(run_ok(&format!("OP_0 OP_IF {op} OP_ENDIF")), Vec::<Vec<u8>>::new(), "{op}");
        }
        assert_eq!(run_err("OP_RETURN"), ScriptError::OpReturn);
        assert_eq!(
            run_ok("OP_NOP OP_NOP1 OP_NOP2 OP_NOP3 OP_NOP4 OP_NOP10 OP_1"),
            nums(&[1])
        );
    }

    #[test]
    fn script_size_limit() {
        let checker = MockChecker::default();
        let flags = ScriptFlags::default();
        let mut stack = ScriptStack::new();
        let at_limit = Script::from(vec![0x61; MAX_SCRIPT_SIZE]);
        assert_eq!(
            Interpreter::new(&checker, flags).eval_script(&mut stack, &at_limit),
            Err(ScriptError::OpCount)
        );
        let over_limit = Script::from(vec![0x00; MAX_SCRIPT_SIZE + 1]);
        assert_eq!(
            Interpreter::new(&checker, flags).eval_script(&mut stack, &over_limit),
            Err(ScriptError::ScriptSize)
        );
    }

    #[test]
    fn push_size_limit_applies_in_skipped_branches() {
        let mut script = Script::builder()
            .push_opcode(all::OP_PUSHBYTES_0)
            .push_opcode(all::OP_IF)
            .push_slice(&[0x42; MAX_SCRIPT_ELEMENT_SIZE + 1])
            .unwrap()
            .push_opcode(all::OP_ENDIF)
            .into_script();
        let checker = MockChecker::default();
        let flags = ScriptFlags::default();
        let mut stack = ScriptStack::new();
        assert_eq!(
            Interpreter::new(&checker, flags).eval_script(&mut stack, &script),
            Err(ScriptError::PushSize)
        );

        script = Script::builder()
            .push_slice(&[0x42; MAX_SCRIPT_ELEMENT_SIZE])
            .unwrap()
            .into_script();
        let mut stack = ScriptStack::new();
        assert!(Interpreter::new(&checker, flags).eval_script(&mut stack, &script).is_ok());
    }

    #[test]
    fn op_count_limit() {
        let at_limit = vec!["OP_NOP"; MAX_OPS_PER_SCRIPT].join(" ");
        assert!(run(&at_limit).0.is_ok());
        let over_limit = vec!["OP_NOP"; MAX_OPS_PER_SCRIPT + 1].join(" ");
        assert_eq!(run_err(&over_limit), ScriptError::OpCount);
        // pushes are free, skipped opcodes are not
        let pushes = vec!["OP_1"; 300].join(" ");
        assert!(run(&pushes).0.is_ok());
        let skipped = format!("OP_0 OP_IF {} OP_ENDIF", vec!["OP_NOP"; 200].join(" "));
        assert_eq!(run_err(&skipped), ScriptError::OpCount);
    }

    #[test]
    fn stack_size_limit_counts_the_alt_stack() {
        let ok = format!("{} {}", vec!["OP_1"; 500].join(" "), vec!["OP_TOALTSTACK OP_1"; 150].join(" "));
        let (result, stack) = run(&ok);
        assert!(result.is_ok());
        assert_eq!(stack.len(), 500);

        let too_deep = format!("{} OP_TOALTSTACK OP_1 OP_1", vec!["OP_1"; 999].join(" "));
        assert_eq!(run_err(&too_deep), ScriptError::StackSize);
    }

    #[test]
    fn stats_track_steps_and_depth() {
        let checker = MockChecker::default();
        let mut interpreter = Interpreter::new(&checker, ScriptFlags::default());
        let mut stack = ScriptStack::new();
        interpreter
            .eval_script(&mut stack, &parse("OP_1 OP_2 OP_3 OP_TOALTSTACK OP_DROP OP_0 OP_IF OP_5 OP_ENDIF"))
            .unwrap();
        assert_eq!(interpreter.stats(), ExecStats { steps: 9, max_stack_depth: 3 });
    }

    #[test]
    fn code_separator_moves_the_script_code() {
        let checker = MockChecker::default();
        let pubkey = b"key".to_vec();
        let initial = vec![MockChecker::sig_for(&pubkey), pubkey];
        let (result, stack) = run_with(&checker, "OP_NOP OP_CODESEPARATOR OP_CHECKSIG", initial);
        assert!(result.is_ok());
        assert_eq!(stack, vec![vec![1]]);
        assert_eq!(checker.seen.borrow().as_slice(), &[Script::from(vec![0xac])]);

        // not executed, so the cursor stays at the start
        let checker = MockChecker::default();
        let initial = vec![MockChecker::sig_for(b"key"), b"key".to_vec()];
        let (result, _) = run_with(&checker, "OP_0 OP_IF OP_CODESEPARATOR OP_ENDIF OP_CHECKSIG", initial);
        assert!(result.is_ok());
        assert_eq!(checker.seen.borrow()[0], parse("OP_0 OP_IF OP_CODESEPARATOR OP_ENDIF OP_CHECKSIG"));
    }

    #[test]
    fn checksig_removes_the_signature_from_the_script_code() {
        let checker = MockChecker::default();
        let sig = MockChecker::sig_for(b"key");
        let script = format!("{} OP_DROP 6b6579 OP_CHECKSIG", sig.iter().map(|b| format!("{b:02x}")).collect::<String>());
        let (result, stack) = run_with(&checker, &script, vec![sig.clone()]);
        assert!(result.is_ok());
        assert_eq!(stack, vec![vec![1]]);
        assert_eq!(checker.seen.borrow()[0], parse("OP_DROP 6b6579 OP_CHECKSIG"));
    }

    #[test]
    fn checksig_failure_pushes_false() {
        let (result, stack) = run_with(
            &MockChecker::default(),
            "OP_CHECKSIG",
            vec![b"bad".to_vec(), b"key".to_vec()],
        );
        assert!(result.is_ok());
        assert_eq!(stack, vec![Vec::<u8>::new()]);

        let (result, _) = run_with(
            &MockChecker::default(),
            "OP_CHECKSIGVERIFY",
            vec![b"bad".to_vec(), b"key".to_vec()],
        );
        assert_eq!(result, Err(ScriptError::CheckSigVerify));
        assert_eq!(run_err("OP_1 OP_CHECKSIG"), ScriptError::InvalidStackOperation);
    }

    #[test]
    fn strict_encoding_gates_the_checker() {
        let checker = MockChecker::default();
        let flags = ScriptFlags::from_bits(VERIFY_STRICTENC).unwrap();
        let mut interpreter = Interpreter::new(&checker, flags);
        let mut stack = ScriptStack::from_items(vec![MockChecker::sig_for(b"key"), b"key".to_vec()]);
        interpreter.eval_script(&mut stack, &parse("OP_CHECKSIG")).unwrap();
        assert_eq!(stack.into_items(), vec![Vec::<u8>::new()]);
        assert!(checker.seen.borrow().is_empty());
    }

    /// Dummy element followed by one mock signature per key, bottom first.
    fn multisig_stack(signing_keys: &[&[u8]]) -> Vec<Vec<u8>> {
        let mut items = vec![Vec::new()];
        items.extend(signing_keys.iter().map(|key| MockChecker::sig_for(key)));
        items
    }

    fn multisig_script(n_sigs: usize, keys: &[&[u8]]) -> String {
        let mut parts = vec![format!("OP_{n_sigs}")];
        for key in keys {
            parts.push(key.iter().map(|b| format!("{b:02x}")).collect());
        }
        parts.push(format!("OP_{}", keys.len()));
        parts.push("OP_CHECKMULTISIG".to_string());
        parts.join(" ")
    }

    #[test]
    fn multisig_accepts_signatures_in_key_order() {
        let keys: [&[u8]; 3] = [b"k1", b"k2", b"k3"];
        let script = multisig_script(2, &keys);

        for sigs in [[b"k1", b"k2"], [b"k1", b"k3"], [b"k2", b"k3"]] {
            let sigs: Vec<&[u8]> = sigs.iter().map(|s| s.as_slice()).collect();
            let (result, stack) = run_with(&MockChecker::default(), &script, multisig_stack(&sigs));
            assert!(result.is_ok());
            assert_eq!(stack, vec![vec![1]], "sigs {sigs:?}");
        }
    }

    #[test]
    fn multisig_rejects_signatures_out_of_order() {
        let keys: [&[u8]; 3] = [b"k1", b"k2", b"k3"];
        let script = multisig_script(2, &keys);
        for sigs in [[b"k2", b"k1"], [b"k3", b"k1"], [b"k1", b"k1"]] {
            let sigs: Vec<&[u8]> = sigs.iter().map(|s| s.as_slice()).collect();
            let (result, stack) = run_with(&MockChecker::default(), &script, multisig_stack(&sigs));
            assert!(result.is_ok());
            assert_eq!(stack, vec![Vec::<u8>::new()], "sigs {sigs:?}");
        }
    }

    #[test]
    fn multisig_stops_once_keys_run_out() {
        let keys: [&[u8]; 3] = [b"k1", b"k2", b"k3"];
        let checker = MockChecker::default();
        let sigs: [&[u8]; 2] = [b"k2", b"bogus"];
        let (result, stack) = run_with(&checker, &multisig_script(2, &keys), multisig_stack(&sigs));
        assert!(result.is_ok());
        assert_eq!(stack, vec![Vec::<u8>::new()]);
        // "bogus" fails against k3 and k2, leaving two signatures for one key
        assert_eq!(checker.seen.borrow().len(), 2);
    }

    #[test]
    fn multisig_consumes_the_extra_element() {
        assert_eq!(run_ok("OP_7 OP_0 OP_0 OP_0 OP_CHECKMULTISIG"), vec![num(7), vec![1]]);
        assert_eq!(run_err("OP_0 OP_0 OP_CHECKMULTISIG"), ScriptError::InvalidStackOperation);
        assert_eq!(run_ok("OP_0 OP_0 OP_0 OP_CHECKMULTISIGVERIFY"), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn multisig_counts() {
        assert_eq!(run_err("OP_0 OP_0 OP_1NEGATE OP_CHECKMULTISIG"), ScriptError::PubkeyCount);
        assert_eq!(run_err("OP_0 OP_0 15 OP_CHECKMULTISIG"), ScriptError::PubkeyCount);
        assert_eq!(run_err("OP_0 OP_2 aa OP_1 OP_CHECKMULTISIG"), ScriptError::SigCount);
        assert_eq!(run_err("OP_0 OP_1NEGATE aa OP_1 OP_CHECKMULTISIG"), ScriptError::SigCount);
        let twenty_keys = format!("OP_0 OP_0 {} 14 OP_CHECKMULTISIG", vec!["aa"; 20].join(" "));
        assert_eq!(run_ok(&twenty_keys), vec![vec![1]]);
    }

    #[test]
    fn multisig_key_count_adds_to_the_op_count() {
        let prefix = vec!["OP_NOP"; 180].join(" ");
        let ok = format!("{prefix} OP_0 OP_0 {} 14 OP_CHECKMULTISIG", vec!["aa"; 20].join(" "));
        assert!(run(&ok).0.is_ok());
        let over = format!("OP_NOP {ok}");
        assert_eq!(run_err(&over), ScriptError::OpCount);
    }

    #[test]
    fn multisig_removes_every_signature_from_the_script_code() {
        let checker = MockChecker::default();
        let sig = MockChecker::sig_for(b"k1");
        let sig_hex: String = sig.iter().map(|b| format!("{b:02x}")).collect();
        let script = format!("{sig_hex} OP_DROP OP_1 6b31 OP_1 OP_CHECKMULTISIG");
        let initial = vec![Vec::new(), sig];
        let (result, stack) = run_with(&checker, &script, initial);
        assert!(result.is_ok());
        assert_eq!(stack, vec![vec![1]]);
        assert_eq!(checker.seen.borrow()[0], parse("OP_DROP OP_1 6b31 OP_1 OP_CHECKMULTISIG"));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert_eq!(ScriptFlags::from_bits(1 << 9), Err(Error::InvalidFlags(1 << 9)));
        let flags = ScriptFlags::from_bits(VERIFY_STRICTENC).unwrap();
        assert!(flags.contains(VERIFY_STRICTENC));
        assert!(!flags.contains(crate::VERIFY_EVEN_S));
    }
}
