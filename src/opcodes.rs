//! Opcode mnemonic table.
//!
//! The table is built once on first use and never mutated afterwards. Only
//! the opcodes listed here are valid in a script; direct pushes
//! (`0x01..=0x4b`) carry no mnemonic but are always decodable.

use std::{collections::HashMap, sync::OnceLock};

use bitcoin::opcodes::{all::*, Opcode};

const OPCODE_NAMES: &[(Opcode, &str)] = &[
    (OP_PUSHBYTES_0, "OP_0"),
    (OP_PUSHDATA1, "OP_PUSHDATA1"),
    (OP_PUSHDATA2, "OP_PUSHDATA2"),
    (OP_PUSHDATA4, "OP_PUSHDATA4"),
    (OP_PUSHNUM_NEG1, "OP_1NEGATE"),
    (OP_RESERVED, "OP_RESERVED"),
    (OP_PUSHNUM_1, "OP_1"),
    (OP_PUSHNUM_2, "OP_2"),
    (OP_PUSHNUM_3, "OP_3"),
    (OP_PUSHNUM_4, "OP_4"),
    (OP_PUSHNUM_5, "OP_5"),
    (OP_PUSHNUM_6, "OP_6"),
    (OP_PUSHNUM_7, "OP_7"),
    (OP_PUSHNUM_8, "OP_8"),
    (OP_PUSHNUM_9, "OP_9"),
    (OP_PUSHNUM_10, "OP_10"),
    (OP_PUSHNUM_11, "OP_11"),
    (OP_PUSHNUM_12, "OP_12"),
    (OP_PUSHNUM_13, "OP_13"),
    (OP_PUSHNUM_14, "OP_14"),
    (OP_PUSHNUM_15, "OP_15"),
    (OP_PUSHNUM_16, "OP_16"),
    (OP_NOP, "OP_NOP"),
    (OP_VER, "OP_VER"),
    (OP_IF, "OP_IF"),
    (OP_NOTIF, "OP_NOTIF"),
    (OP_VERIF, "OP_VERIF"),
    (OP_VERNOTIF, "OP_VERNOTIF"),
    (OP_ELSE, "OP_ELSE"),
    (OP_ENDIF, "OP_ENDIF"),
    (OP_VERIFY, "OP_VERIFY"),
    (OP_RETURN, "OP_RETURN"),
    (OP_TOALTSTACK, "OP_TOALTSTACK"),
    (OP_FROMALTSTACK, "OP_FROMALTSTACK"),
    (OP_2DROP, "OP_2DROP"),
    (OP_2DUP, "OP_2DUP"),
    (OP_3DUP, "OP_3DUP"),
    (OP_2OVER, "OP_2OVER"),
    (OP_2ROT, "OP_2ROT"),
    (OP_2SWAP, "OP_2SWAP"),
    (OP_IFDUP, "OP_IFDUP"),
    (OP_DEPTH, "OP_DEPTH"),
    (OP_DROP, "OP_DROP"),
    (OP_DUP, "OP_DUP"),
    (OP_NIP, "OP_NIP"),
    (OP_OVER, "OP_OVER"),
    (OP_PICK, "OP_PICK"),
    (OP_ROLL, "OP_ROLL"),
    (OP_ROT, "OP_ROT"),
    (OP_SWAP, "OP_SWAP"),
    (OP_TUCK, "OP_TUCK"),
    (OP_CAT, "OP_CAT"),
    (OP_SUBSTR, "OP_SUBSTR"),
    (OP_LEFT, "OP_LEFT"),
    (OP_RIGHT, "OP_RIGHT"),
    (OP_SIZE, "OP_SIZE"),
    (OP_INVERT, "OP_INVERT"),
    (OP_AND, "OP_AND"),
    (OP_OR, "OP_OR"),
    (OP_XOR, "OP_XOR"),
    (OP_EQUAL, "OP_EQUAL"),
    (OP_EQUALVERIFY, "OP_EQUALVERIFY"),
    (OP_RESERVED1, "OP_RESERVED1"),
    (OP_RESERVED2, "OP_RESERVED2"),
    (OP_1ADD, "OP_1ADD"),
    (OP_1SUB, "OP_1SUB"),
    (OP_2MUL, "OP_2MUL"),
    (OP_2DIV, "OP_2DIV"),
    (OP_NEGATE, "OP_NEGATE"),
    (OP_ABS, "OP_ABS"),
    (OP_NOT, "OP_NOT"),
    (OP_0NOTEQUAL, "OP_0NOTEQUAL"),
    (OP_ADD, "OP_ADD"),
    (OP_SUB, "OP_SUB"),
    (OP_MUL, "OP_MUL"),
    (OP_DIV, "OP_DIV"),
    (OP_MOD, "OP_MOD"),
    (OP_LSHIFT, "OP_LSHIFT"),
    (OP_RSHIFT, "OP_RSHIFT"),
    (OP_BOOLAND, "OP_BOOLAND"),
    (OP_BOOLOR, "OP_BOOLOR"),
    (OP_NUMEQUAL, "OP_NUMEQUAL"),
    (OP_NUMEQUALVERIFY, "OP_NUMEQUALVERIFY"),
    (OP_NUMNOTEQUAL, "OP_NUMNOTEQUAL"),
    (OP_LESSTHAN, "OP_LESSTHAN"),
    (OP_GREATERTHAN, "OP_GREATERTHAN"),
    (OP_LESSTHANOREQUAL, "OP_LESSTHANOREQUAL"),
    (OP_GREATERTHANOREQUAL, "OP_GREATERTHANOREQUAL"),
    (OP_MIN, "OP_MIN"),
    (OP_MAX, "OP_MAX"),
    (OP_WITHIN, "OP_WITHIN"),
    (OP_RIPEMD160, "OP_RIPEMD160"),
    (OP_SHA1, "OP_SHA1"),
    (OP_SHA256, "OP_SHA256"),
    (OP_HASH160, "OP_HASH160"),
    (OP_HASH256, "OP_HASH256"),
    (OP_CODESEPARATOR, "OP_CODESEPARATOR"),
    (OP_CHECKSIG, "OP_CHECKSIG"),
    (OP_CHECKSIGVERIFY, "OP_CHECKSIGVERIFY"),
    (OP_CHECKMULTISIG, "OP_CHECKMULTISIG"),
    (OP_CHECKMULTISIGVERIFY, "OP_CHECKMULTISIGVERIFY"),
    (OP_NOP1, "OP_NOP1"),
    (OP_CLTV, "OP_NOP2"),
    (OP_CSV, "OP_NOP3"),
    (OP_NOP4, "OP_NOP4"),
    (OP_NOP5, "OP_NOP5"),
    (OP_NOP6, "OP_NOP6"),
    (OP_NOP7, "OP_NOP7"),
    (OP_NOP8, "OP_NOP8"),
    (OP_NOP9, "OP_NOP9"),
    (OP_NOP10, "OP_NOP10"),
    // Template placeholders: named, but fail when executed.
    (OP_RETURN_249, "OP_SMALLDATA"),
    (OP_RETURN_253, "OP_PUBKEYHASH"),
    (OP_RETURN_254, "OP_PUBKEY"),
    (OP_INVALIDOPCODE, "OP_INVALIDOPCODE"),
];

/// Extra spellings accepted when parsing but never printed.
const ALIASES: &[(&str, Opcode)] = &[("OP_FALSE", OP_PUSHBYTES_0), ("OP_TRUE", OP_PUSHNUM_1)];

const DISABLED: &[Opcode] = &[
    OP_CAT, OP_SUBSTR, OP_LEFT, OP_RIGHT, OP_INVERT, OP_AND, OP_OR, OP_XOR, OP_2MUL, OP_2DIV,
    OP_MUL, OP_DIV, OP_MOD, OP_LSHIFT, OP_RSHIFT,
];

struct OpcodeTable {
    names: [Option<&'static str>; 256],
    by_name: HashMap<&'static str, Opcode>,
}

impl OpcodeTable {
    fn build() -> Self {
        let mut names = [None; 256];
        let mut by_name = HashMap::with_capacity(OPCODE_NAMES.len() + ALIASES.len());
        for &(op, name) in OPCODE_NAMES {
            names[usize::from(op.to_u8())] = Some(name);
            by_name.insert(name, op);
        }
        for &(alias, op) in ALIASES {
            by_name.insert(alias, op);
        }
        Self { names, by_name }
    }
}

static OPCODE_TABLE: OnceLock<OpcodeTable> = OnceLock::new();

fn table() -> &'static OpcodeTable {
    OPCODE_TABLE.get_or_init(OpcodeTable::build)
}

/// Mnemonic of `op`, or `None` for direct pushes and unassigned bytes.
pub fn name_of(op: Opcode) -> Option<&'static str> {
    table().names[usize::from(op.to_u8())]
}

/// Looks up a mnemonic, including the `OP_FALSE`/`OP_TRUE` aliases.
pub fn from_name(name: &str) -> Option<Opcode> {
    table().by_name.get(name).copied()
}

/// Whether `byte` may appear as an instruction.
pub fn is_known(byte: u8) -> bool {
    (0x01..=0x4b).contains(&byte) || table().names[usize::from(byte)].is_some()
}

/// Opcodes that fail a script wherever they appear, even in an unexecuted
/// branch.
pub fn is_disabled(op: Opcode) -> bool {
    DISABLED.contains(&op)
}

/// Opcodes evaluated regardless of the branch state.
pub fn is_conditional(op: Opcode) -> bool {
    matches!(op, OP_IF | OP_NOTIF | OP_VERIF | OP_VERNOTIF | OP_ELSE | OP_ENDIF)
}
