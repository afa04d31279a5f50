//! RandomX Program Generation
//!
//! Each VM round generates 2176 bytes with the 4-round AES generator: 128
//! bytes of entropy (register seeds and memory configuration) followed by
//! 256 raw 8-byte instructions. The raw instructions are compiled once per
//! round into [`ByteCode`], resolving operand forms, scratchpad masks,
//! reciprocals and branch targets ahead of execution.

use crate::aes::AesBackend;
use crate::config::{
    CONDITION_MASK, ENTROPY_SIZE, INSTRUCTION_SIZE, JUMP_OFFSET, PROGRAM_BUFFER_SIZE, PROGRAM_SIZE,
    REGISTER_COUNT, REGISTER_COUNT_FLT, REGISTER_NEEDS_DISPLACEMENT, SCRATCHPAD_L1_MASK, SCRATCHPAD_L2_MASK,
    SCRATCHPAD_L3_MASK, STORE_L3_CONDITION,
};
use crate::superscalar::{reciprocal, sign_extend};

// =============================================================================
// OPCODES
// =============================================================================

/// Raw instruction types, before operand forms are resolved.
#[allow(non_camel_case_types, missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    IADD_RS,
    IADD_M,
    ISUB_R,
    ISUB_M,
    IMUL_R,
    IMUL_M,
    IMULH_R,
    IMULH_M,
    ISMULH_R,
    ISMULH_M,
    IMUL_RCP,
    INEG_R,
    IXOR_R,
    IXOR_M,
    IROR_R,
    IROL_R,
    ISWAP_R,
    FSWAP_R,
    FADD_R,
    FADD_M,
    FSUB_R,
    FSUB_M,
    FSCAL_R,
    FMUL_R,
    FDIV_M,
    FSQRT_R,
    CBRANCH,
    CFROUND,
    ISTORE,
}

/// Opcode byte ranges (inclusive). The widths are the instruction
/// frequencies out of 256.
pub const INSTRUCTION_FREQUENCIES: [(u8, u8, Opcode); 29] = [
    (0, 15, Opcode::IADD_RS),    // 16
    (16, 22, Opcode::IADD_M),    // 7
    (23, 38, Opcode::ISUB_R),    // 16
    (39, 45, Opcode::ISUB_M),    // 7
    (46, 61, Opcode::IMUL_R),    // 16
    (62, 65, Opcode::IMUL_M),    // 4
    (66, 69, Opcode::IMULH_R),   // 4
    (70, 70, Opcode::IMULH_M),   // 1
    (71, 74, Opcode::ISMULH_R),  // 4
    (75, 75, Opcode::ISMULH_M),  // 1
    (76, 83, Opcode::IMUL_RCP),  // 8
    (84, 85, Opcode::INEG_R),    // 2
    (86, 100, Opcode::IXOR_R),   // 15
    (101, 105, Opcode::IXOR_M),  // 5
    (106, 113, Opcode::IROR_R),  // 8
    (114, 115, Opcode::IROL_R),  // 2
    (116, 119, Opcode::ISWAP_R), // 4
    (120, 123, Opcode::FSWAP_R), // 4
    (124, 139, Opcode::FADD_R),  // 16
    (140, 144, Opcode::FADD_M),  // 5
    (145, 160, Opcode::FSUB_R),  // 16
    (161, 165, Opcode::FSUB_M),  // 5
    (166, 171, Opcode::FSCAL_R), // 6
    (172, 203, Opcode::FMUL_R),  // 32
    (204, 207, Opcode::FDIV_M),  // 4
    (208, 213, Opcode::FSQRT_R), // 6
    (214, 238, Opcode::CBRANCH), // 25
    (239, 239, Opcode::CFROUND), // 1
    (240, 255, Opcode::ISTORE),  // 16
];

const fn build_opcode_table() -> [Opcode; 256] {
    let mut table = [Opcode::ISTORE; 256];
    let mut i = 0;
    while i < INSTRUCTION_FREQUENCIES.len() {
        let (start, end, opcode) = INSTRUCTION_FREQUENCIES[i];
        let mut byte = start as usize;
        while byte <= end as usize {
            table[byte] = opcode;
            byte += 1;
        }
        i += 1;
    }
    table
}

static OPCODE_TABLE: [Opcode; 256] = build_opcode_table();

/// Get opcode from frequency byte
pub fn opcode_from_byte(byte: u8) -> Opcode {
    OPCODE_TABLE[byte as usize]
}

// =============================================================================
// BYTECODE
// =============================================================================

/// Scratchpad operand: a register plus displacement under an L1/L2/L3
/// mask, or a fixed L3 address when the source register is the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    /// `(r[src] + imm) & mask`
    Register {
        /// Integer register holding the base address.
        src: u8,
        /// Sign-extended displacement.
        imm: u64,
        /// L1, L2 or L3 address mask.
        mask: u32,
    },
    /// Precomputed L3 address.
    Fixed(u32),
}

impl Address {
    /// Scratchpad byte offset for the current integer registers.
    #[inline]
    pub fn resolve(self, r: &[u64; REGISTER_COUNT]) -> u32 {
        match self {
            Self::Register { src, imm, mask } => (r[src as usize].wrapping_add(imm) as u32) & mask,
            Self::Fixed(addr) => addr,
        }
    }
}

/// Compiled instruction. `_I` forms carry an immediate in place of the
/// source register; float `dst`/`src` index the 4-entry F/E/A groups.
#[allow(non_camel_case_types, missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    NOP,
    IADD_RS { dst: u8, src: u8, shift: u32, imm: u64 },
    IADD_M { dst: u8, mem: Address },
    ISUB_R { dst: u8, src: u8 },
    ISUB_I { dst: u8, imm: u64 },
    ISUB_M { dst: u8, mem: Address },
    IMUL_R { dst: u8, src: u8 },
    /// Also IMUL_RCP, with the precomputed reciprocal as `imm`.
    IMUL_I { dst: u8, imm: u64 },
    IMUL_M { dst: u8, mem: Address },
    IMULH_R { dst: u8, src: u8 },
    IMULH_M { dst: u8, mem: Address },
    ISMULH_R { dst: u8, src: u8 },
    ISMULH_M { dst: u8, mem: Address },
    INEG_R { dst: u8 },
    IXOR_R { dst: u8, src: u8 },
    IXOR_I { dst: u8, imm: u64 },
    IXOR_M { dst: u8, mem: Address },
    IROR_R { dst: u8, src: u8 },
    IROR_I { dst: u8, imm: u64 },
    IROL_R { dst: u8, src: u8 },
    IROL_I { dst: u8, imm: u64 },
    ISWAP_R { dst: u8, src: u8 },
    FSWAP_F { dst: u8 },
    FSWAP_E { dst: u8 },
    FADD_R { dst: u8, src: u8 },
    FADD_M { dst: u8, mem: Address },
    FSUB_R { dst: u8, src: u8 },
    FSUB_M { dst: u8, mem: Address },
    FSCAL_R { dst: u8 },
    FMUL_R { dst: u8, src: u8 },
    FDIV_M { dst: u8, mem: Address },
    FSQRT_R { dst: u8 },
    /// `target` is the instruction executed next when the branch is taken.
    CBRANCH { reg: u8, imm: u64, mask: u64, target: u16 },
    CFROUND { src: u8, rotate: u32 },
    ISTORE { dst: u8, src: u8, imm: u64, mask: u32 },
}

/// A round's 256 instructions, ready for the interpreter.
#[derive(Clone, Debug)]
pub struct ByteCode {
    instructions: [Instruction; PROGRAM_SIZE],
}

impl ByteCode {
    /// Compile 2048 bytes of raw instructions.
    ///
    /// # Panics
    /// If `raw` is shorter than `PROGRAM_SIZE * INSTRUCTION_SIZE` bytes.
    pub fn compile(raw: &[u8]) -> Self {
        assert!(raw.len() >= PROGRAM_SIZE * INSTRUCTION_SIZE, "program too short");

        // Last instruction that modified each register, for CBRANCH targets.
        let mut register_usage = [-1i32; REGISTER_COUNT];
        let mut instructions = [Instruction::NOP; PROGRAM_SIZE];

        for (i, (bytes, out)) in raw.chunks_exact(INSTRUCTION_SIZE).zip(instructions.iter_mut()).enumerate() {
            let opcode = opcode_from_byte(bytes[0]);
            let dst = bytes[1] % REGISTER_COUNT as u8;
            let src = bytes[2] % REGISTER_COUNT as u8;
            let modifier = bytes[3];
            let imm32 = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
            let imm = sign_extend(imm32);
            let fdst = dst % REGISTER_COUNT_FLT as u8;
            let fsrc = src % REGISTER_COUNT_FLT as u8;

            let l1_l2 = if modifier % 4 != 0 { SCRATCHPAD_L1_MASK } else { SCRATCHPAD_L2_MASK };
            let mem = if src != dst {
                Address::Register { src, imm, mask: l1_l2 }
            } else {
                Address::Fixed(imm as u32 & SCRATCHPAD_L3_MASK)
            };
            // Float loads always go through a register.
            let fmem = Address::Register { src, imm, mask: l1_l2 };

            let i = i as i32;

            *out = match opcode {
                Opcode::IADD_RS => {
                    register_usage[dst as usize] = i;
                    let imm = if dst as usize == REGISTER_NEEDS_DISPLACEMENT { imm } else { 0 };
                    Instruction::IADD_RS { dst, src, shift: u32::from((modifier >> 2) % 4), imm }
                }
                Opcode::IADD_M => {
                    register_usage[dst as usize] = i;
                    Instruction::IADD_M { dst, mem }
                }
                Opcode::ISUB_R => {
                    register_usage[dst as usize] = i;
                    if src != dst { Instruction::ISUB_R { dst, src } } else { Instruction::ISUB_I { dst, imm } }
                }
                Opcode::ISUB_M => {
                    register_usage[dst as usize] = i;
                    Instruction::ISUB_M { dst, mem }
                }
                Opcode::IMUL_R => {
                    register_usage[dst as usize] = i;
                    if src != dst { Instruction::IMUL_R { dst, src } } else { Instruction::IMUL_I { dst, imm } }
                }
                Opcode::IMUL_M => {
                    register_usage[dst as usize] = i;
                    Instruction::IMUL_M { dst, mem }
                }
                Opcode::IMULH_R => {
                    register_usage[dst as usize] = i;
                    Instruction::IMULH_R { dst, src }
                }
                Opcode::IMULH_M => {
                    register_usage[dst as usize] = i;
                    Instruction::IMULH_M { dst, mem }
                }
                Opcode::ISMULH_R => {
                    register_usage[dst as usize] = i;
                    Instruction::ISMULH_R { dst, src }
                }
                Opcode::ISMULH_M => {
                    register_usage[dst as usize] = i;
                    Instruction::ISMULH_M { dst, mem }
                }
                Opcode::IMUL_RCP => {
                    if imm32 != 0 && !imm32.is_power_of_two() {
                        register_usage[dst as usize] = i;
                        Instruction::IMUL_I { dst, imm: reciprocal(imm32) }
                    } else {
                        Instruction::NOP
                    }
                }
                Opcode::INEG_R => {
                    register_usage[dst as usize] = i;
                    Instruction::INEG_R { dst }
                }
                Opcode::IXOR_R => {
                    register_usage[dst as usize] = i;
                    if src != dst { Instruction::IXOR_R { dst, src } } else { Instruction::IXOR_I { dst, imm } }
                }
                Opcode::IXOR_M => {
                    register_usage[dst as usize] = i;
                    Instruction::IXOR_M { dst, mem }
                }
                Opcode::IROR_R => {
                    register_usage[dst as usize] = i;
                    if src != dst { Instruction::IROR_R { dst, src } } else { Instruction::IROR_I { dst, imm } }
                }
                Opcode::IROL_R => {
                    register_usage[dst as usize] = i;
                    if src != dst { Instruction::IROL_R { dst, src } } else { Instruction::IROL_I { dst, imm } }
                }
                Opcode::ISWAP_R => {
                    if src != dst {
                        register_usage[dst as usize] = i;
                        register_usage[src as usize] = i;
                        Instruction::ISWAP_R { dst, src }
                    } else {
                        Instruction::NOP
                    }
                }
                Opcode::FSWAP_R => {
                    if (dst as usize) < REGISTER_COUNT_FLT {
                        Instruction::FSWAP_F { dst }
                    } else {
                        Instruction::FSWAP_E { dst: dst - REGISTER_COUNT_FLT as u8 }
                    }
                }
                Opcode::FADD_R => Instruction::FADD_R { dst: fdst, src: fsrc },
                Opcode::FADD_M => Instruction::FADD_M { dst: fdst, mem: fmem },
                Opcode::FSUB_R => Instruction::FSUB_R { dst: fdst, src: fsrc },
                Opcode::FSUB_M => Instruction::FSUB_M { dst: fdst, mem: fmem },
                Opcode::FSCAL_R => Instruction::FSCAL_R { dst: fdst },
                Opcode::FMUL_R => Instruction::FMUL_R { dst: fdst, src: fsrc },
                Opcode::FDIV_M => Instruction::FDIV_M { dst: fdst, mem: fmem },
                Opcode::FSQRT_R => Instruction::FSQRT_R { dst: fdst },
                Opcode::CBRANCH => {
                    let target = register_usage[dst as usize];
                    let shift = u32::from(modifier >> 4) + JUMP_OFFSET;
                    let imm = (imm | (1u64 << shift)) & !(1u64 << (shift - 1));
                    register_usage = [i; REGISTER_COUNT];
                    Instruction::CBRANCH {
                        reg: dst,
                        imm,
                        mask: CONDITION_MASK << shift,
                        target: (target + 1) as u16,
                    }
                }
                Opcode::CFROUND => Instruction::CFROUND { src, rotate: imm32 & 63 },
                Opcode::ISTORE => {
                    let mask = if modifier >> 4 < STORE_L3_CONDITION { l1_l2 } else { SCRATCHPAD_L3_MASK };
                    Instruction::ISTORE { dst, src, imm, mask }
                }
            };
        }

        Self { instructions }
    }

    /// Compiled instructions in program order.
    pub fn instructions(&self) -> &[Instruction; PROGRAM_SIZE] {
        &self.instructions
    }
}

// =============================================================================
// PROGRAM
// =============================================================================

/// A complete RandomX program: entropy plus compiled instructions.
#[derive(Clone, Debug)]
pub struct Program {
    /// Program entropy (16 x 64-bit values)
    pub entropy: [u64; 16],
    /// Compiled instructions
    pub bytecode: ByteCode,
}

impl Program {
    /// Generate a program from a 64-byte seed with the 4-round AES
    /// generator.
    pub fn generate(aes: AesBackend, seed: &[u8; 64]) -> Self {
        let mut buffer = [0u8; PROGRAM_BUFFER_SIZE];
        aes.fill_aes_4rx4(seed, &mut buffer);

        let (head, body) = buffer.split_at(ENTROPY_SIZE);
        let mut entropy = [0u64; 16];
        for (e, chunk) in entropy.iter_mut().zip(head.chunks_exact(8)) {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            *e = u64::from_le_bytes(word);
        }

        Self {
            entropy,
            bytecode: ByteCode::compile(body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(instrs: &[[u8; 8]]) -> Vec<u8> {
        let mut out = vec![0u8; PROGRAM_SIZE * INSTRUCTION_SIZE];
        // Fill with an ISTORE to L3 so unused slots never touch registers.
        for chunk in out.chunks_exact_mut(8) {
            chunk.copy_from_slice(&[240, 0, 0, 0xF0, 0, 0, 0, 0]);
        }
        for (slot, bytes) in instrs.iter().enumerate() {
            out[slot * 8..slot * 8 + 8].copy_from_slice(bytes);
        }
        out
    }

    #[test]
    fn frequency_table_covers_every_byte() {
        let mut covered = 0usize;
        let mut next = 0usize;
        for &(start, end, _) in &INSTRUCTION_FREQUENCIES {
            assert_eq!(start as usize, next);
            covered += (end - start) as usize + 1;
            next = end as usize + 1;
        }
        assert_eq!(covered, 256);
        assert_eq!(opcode_from_byte(0), Opcode::IADD_RS);
        assert_eq!(opcode_from_byte(100), Opcode::IXOR_R);
        assert_eq!(opcode_from_byte(213), Opcode::FSQRT_R);
        assert_eq!(opcode_from_byte(239), Opcode::CFROUND);
        assert_eq!(opcode_from_byte(255), Opcode::ISTORE);
    }

    #[test]
    fn integer_operand_forms() {
        let code = ByteCode::compile(&raw(&[
            [23, 1, 2, 0, 5, 0, 0, 0],          // ISUB_R r1, r2
            [23, 3, 3, 0, 5, 0, 0, 0],          // ISUB_R r3, imm
            [16, 1, 2, 1, 8, 0, 0, 0],          // IADD_M L1
            [16, 1, 2, 0, 8, 0, 0, 0],          // IADD_M L2
            [16, 4, 4, 0, 0xf8, 0xff, 0xff, 0xff], // IADD_M fixed L3
            [0, 5, 1, 0x0c, 9, 0, 0, 0],        // IADD_RS r5 keeps imm
            [0, 4, 1, 0x0c, 9, 0, 0, 0],        // IADD_RS r4 drops imm
        ]));
        let ins = code.instructions();
        assert_eq!(ins[0], Instruction::ISUB_R { dst: 1, src: 2 });
        assert_eq!(ins[1], Instruction::ISUB_I { dst: 3, imm: 5 });
        assert_eq!(ins[2], Instruction::IADD_M { dst: 1, mem: Address::Register { src: 2, imm: 8, mask: SCRATCHPAD_L1_MASK } });
        assert_eq!(ins[3], Instruction::IADD_M { dst: 1, mem: Address::Register { src: 2, imm: 8, mask: SCRATCHPAD_L2_MASK } });
        assert_eq!(ins[4], Instruction::IADD_M { dst: 4, mem: Address::Fixed(SCRATCHPAD_L3_MASK) });
        assert_eq!(ins[5], Instruction::IADD_RS { dst: 5, src: 1, shift: 3, imm: 9 });
        assert_eq!(ins[6], Instruction::IADD_RS { dst: 4, src: 1, shift: 3, imm: 0 });
    }

    #[test]
    fn reciprocal_and_swap_degenerate_to_nop() {
        let code = ByteCode::compile(&raw(&[
            [76, 0, 0, 0, 0, 0, 0, 0],   // IMUL_RCP 0
            [76, 0, 0, 0, 0, 4, 0, 0],   // IMUL_RCP 1 << 10
            [76, 2, 0, 0, 3, 0, 0, 0],   // IMUL_RCP 3
            [116, 6, 6, 0, 0, 0, 0, 0],  // ISWAP_R r6, r6
        ]));
        let ins = code.instructions();
        assert_eq!(ins[0], Instruction::NOP);
        assert_eq!(ins[1], Instruction::NOP);
        assert_eq!(ins[2], Instruction::IMUL_I { dst: 2, imm: reciprocal(3) });
        assert_eq!(ins[3], Instruction::NOP);
    }

    #[test]
    fn float_register_selection() {
        let code = ByteCode::compile(&raw(&[
            [120, 2, 0, 0, 0, 0, 0, 0],  // FSWAP_R f2
            [120, 6, 0, 0, 0, 0, 0, 0],  // FSWAP_R e2
            [124, 5, 7, 0, 0, 0, 0, 0],  // FADD_R f1, a3
            [204, 1, 1, 0, 16, 0, 0, 0], // FDIV_M e1, [r1 + 16] (never fixed)
        ]));
        let ins = code.instructions();
        assert_eq!(ins[0], Instruction::FSWAP_F { dst: 2 });
        assert_eq!(ins[1], Instruction::FSWAP_E { dst: 2 });
        assert_eq!(ins[2], Instruction::FADD_R { dst: 1, src: 3 });
        assert_eq!(ins[3], Instruction::FDIV_M { dst: 1, mem: Address::Register { src: 1, imm: 16, mask: SCRATCHPAD_L2_MASK } });
    }

    #[test]
    fn branch_targets_follow_register_usage() {
        let code = ByteCode::compile(&raw(&[
            [214, 3, 0, 0x00, 0, 0, 0, 0], // CBRANCH r3, nothing written yet
            [23, 3, 1, 0, 0, 0, 0, 0],     // ISUB_R r3, r1
            [46, 2, 1, 0, 0, 0, 0, 0],     // IMUL_R r2, r1
            [214, 3, 0, 0x20, 0, 0, 0, 0], // CBRANCH r3 -> after slot 1
            [214, 2, 0, 0x00, 0, 0, 0, 0], // CBRANCH r2 -> after slot 3
        ]));
        let ins = code.instructions();
        assert_eq!(
            ins[0],
            Instruction::CBRANCH { reg: 3, imm: 1 << 8, mask: 0xFF << 8, target: 0 }
        );
        assert_eq!(
            ins[3],
            Instruction::CBRANCH { reg: 3, imm: 1 << 10, mask: 0xFF << 10, target: 2 }
        );
        match ins[4] {
            Instruction::CBRANCH { target, .. } => assert_eq!(target, 4),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn branch_immediate_clears_bit_below_condition() {
        let code = ByteCode::compile(&raw(&[[214, 0, 0, 0x10, 0xff, 0xff, 0xff, 0xff]]));
        match code.instructions()[0] {
            Instruction::CBRANCH { imm, mask, .. } => {
                assert_eq!(mask, 0xFF << 9);
                assert_eq!(imm & (1 << 9), 1 << 9);
                assert_eq!(imm & (1 << 8), 0);
                assert_eq!(imm | (1 << 8), u64::MAX);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn store_level_from_modifier() {
        let code = ByteCode::compile(&raw(&[
            [240, 1, 2, 0x01, 0, 0, 0, 0],
            [240, 1, 2, 0x00, 0, 0, 0, 0],
            [240, 1, 2, 0xE1, 0, 0, 0, 0],
        ]));
        let ins = code.instructions();
        assert_eq!(ins[0], Instruction::ISTORE { dst: 1, src: 2, imm: 0, mask: SCRATCHPAD_L1_MASK });
        assert_eq!(ins[1], Instruction::ISTORE { dst: 1, src: 2, imm: 0, mask: SCRATCHPAD_L2_MASK });
        assert_eq!(ins[2], Instruction::ISTORE { dst: 1, src: 2, imm: 0, mask: SCRATCHPAD_L3_MASK });
    }

    #[test]
    fn cfround_immediate_is_six_bits() {
        let code = ByteCode::compile(&raw(&[[239, 0, 5, 0, 0x7f, 0, 0, 0]]));
        assert_eq!(code.instructions()[0], Instruction::CFROUND { src: 5, rotate: 63 });
    }

    #[test]
    fn generate_is_deterministic() {
        let seed = [7u8; 64];
        let a = Program::generate(AesBackend::Portable, &seed);
        let b = Program::generate(AesBackend::Portable, &seed);
        assert_eq!(a.entropy, b.entropy);
        assert_eq!(a.bytecode.instructions(), b.bytecode.instructions());
    }
}
