// This module is the static mnemonic-to-builtin table used by the variant lowering
// mode. Each entry maps an intrinsic mnemonic to a builtin opcode family and a
// subcode immediate; the numbering mirrors the virtual machine's builtin dispatch
// table and must not be reordered. Subcodes 1, 3 and 4 of the register family are
// the range-call forms whose register block must stay contiguous.

//! Builtin opcode table for variant lowering.

/// Encoding family of a builtin instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuiltinFamily {
    /// Accumulator-only form, `builtin.acc subcode`.
    Acc,
    /// Register form, `builtin.r2i subcode, argc, v...`.
    R2i,
}

/// One entry of the builtin dispatch table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltinCode {
    pub family: BuiltinFamily,
    pub subcode: i64,
}

const fn acc(subcode: i64) -> BuiltinCode {
    BuiltinCode {
        family: BuiltinFamily::Acc,
        subcode,
    }
}

const fn r2i(subcode: i64) -> BuiltinCode {
    BuiltinCode {
        family: BuiltinFamily::R2i,
        subcode,
    }
}

/// Mnemonic of the one intrinsic whose immediate and string operands are
/// materialized into registers before the builtin call is formed.
pub const DEFINE_GLOBAL_VAR: &str = "defineGlobalVar";

/// Look up the builtin encoding for an intrinsic mnemonic.
pub fn builtin_code(mnemonic: &str) -> Option<BuiltinCode> {
    // Subcodes 1/3/4 of the r2i family are range forms.
    let code = match mnemonic {
        "toNumber" => acc(4),
        "negate" => acc(12),
        "typeOf" => acc(28),
        "returnUndefined" => acc(23),
        "throwDyn" => acc(31),
        "callSpread" => r2i(1),
        "createObjectWithExcludedKeys" => r2i(2),
        "call" => r2i(3),
        "newObjRange" => r2i(4),
        "createArrayWithBuffer" => r2i(6),
        "createObjectWithBuffer" => r2i(7),
        DEFINE_GLOBAL_VAR => r2i(41),
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_is_a_range_builtin() {
        let code = builtin_code("call").unwrap();
        assert_eq!(code.family, BuiltinFamily::R2i);
        assert_eq!(code.subcode, 3);
    }

    #[test]
    fn unknown_mnemonic_is_none() {
        assert!(builtin_code("definitelyNotABuiltin").is_none());
    }
}
