//! SuperscalarHash Program Generation
//!
//! Superscalar programs expand the cache into dataset items. Each program is
//! built by simulating a 3-port out-of-order x86 core for 170 cycles: decode
//! buffers pick instruction lengths, instructions are drawn from fixed
//! per-length pools, and source/destination registers are only chosen once
//! their last writer has retired in the model. The result is fully
//! determined by the Blake2 entropy stream.

use crate::blake2b::Blake2Generator;
use crate::config::{REGISTER_COUNT, REGISTER_NEEDS_DISPLACEMENT, SUPERSCALAR_LATENCY, SUPERSCALAR_MAX_SIZE};

// =============================================================================
// INSTRUCTIONS
// =============================================================================

/// Superscalar opcodes. The C7/C8/C9 variants only differ in encoded length.
#[allow(non_camel_case_types, missing_docs)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuperscalarOpcode {
    ISUB_R,
    IXOR_R,
    IADD_RS,
    IMUL_R,
    IROR_C,
    IADD_C7,
    IXOR_C7,
    IADD_C8,
    IXOR_C8,
    IADD_C9,
    IXOR_C9,
    IMULH_R,
    ISMULH_R,
    IMUL_RCP,
}

impl SuperscalarOpcode {
    fn is_multiplication(self) -> bool {
        matches!(self, Self::IMUL_R | Self::IMULH_R | Self::ISMULH_R | Self::IMUL_RCP)
    }
}

/// One generated instruction.
///
/// `imm` is pre-decoded: the shift for IADD_RS, the rotation for IROR_C, the
/// sign-extended constant for IADD_C*/IXOR_C* and the reciprocal for
/// IMUL_RCP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SuperscalarInstruction {
    /// Operation
    pub opcode: SuperscalarOpcode,
    /// Destination register
    pub dst: u8,
    /// Source register; ignored by the immediate forms
    pub src: u8,
    /// Decoded immediate
    pub imm: u64,
}

/// Superscalar program for dataset generation
#[derive(Clone, Debug)]
pub struct SuperscalarProgram {
    instructions: Vec<SuperscalarInstruction>,
    address_register: usize,
}

impl SuperscalarProgram {
    /// Generate a program from the entropy stream.
    pub fn generate(gen: &mut Blake2Generator) -> Self {
        Builder::new().build(gen)
    }

    /// Register whose value selects the next cache block: the one with the
    /// longest dependency chain.
    pub fn address_register(&self) -> usize {
        self.address_register
    }

    /// Instructions in execution order.
    pub fn instructions(&self) -> &[SuperscalarInstruction] {
        &self.instructions
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True for a program with no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Execute superscalar program on register file
    pub fn execute(&self, regs: &mut [u64; REGISTER_COUNT]) {
        for instr in &self.instructions {
            let dst = instr.dst as usize;
            let src = instr.src as usize;

            match instr.opcode {
                SuperscalarOpcode::ISUB_R => regs[dst] = regs[dst].wrapping_sub(regs[src]),
                SuperscalarOpcode::IXOR_R => regs[dst] ^= regs[src],
                SuperscalarOpcode::IADD_RS => {
                    regs[dst] = regs[dst].wrapping_add(regs[src] << instr.imm);
                }
                SuperscalarOpcode::IMUL_R => regs[dst] = regs[dst].wrapping_mul(regs[src]),
                SuperscalarOpcode::IROR_C => regs[dst] = regs[dst].rotate_right(instr.imm as u32),
                SuperscalarOpcode::IADD_C7 | SuperscalarOpcode::IADD_C8 | SuperscalarOpcode::IADD_C9 => {
                    regs[dst] = regs[dst].wrapping_add(instr.imm);
                }
                SuperscalarOpcode::IXOR_C7 | SuperscalarOpcode::IXOR_C8 | SuperscalarOpcode::IXOR_C9 => {
                    regs[dst] ^= instr.imm;
                }
                SuperscalarOpcode::IMULH_R => regs[dst] = mulh(regs[dst], regs[src]),
                SuperscalarOpcode::ISMULH_R => regs[dst] = smulh(regs[dst], regs[src]),
                SuperscalarOpcode::IMUL_RCP => regs[dst] = regs[dst].wrapping_mul(instr.imm),
            }
        }
    }
}

// =============================================================================
// INTEGER HELPERS
// =============================================================================

/// High 64 bits of the unsigned 128-bit product.
#[inline]
pub fn mulh(a: u64, b: u64) -> u64 {
    ((u128::from(a) * u128::from(b)) >> 64) as u64
}

/// High 64 bits of the signed 128-bit product.
#[inline]
pub fn smulh(a: u64, b: u64) -> u64 {
    ((i128::from(a as i64) * i128::from(b as i64)) >> 64) as u64
}

/// Sign-extends a 32-bit immediate to 64 bits.
#[inline]
pub fn sign_extend(imm: u32) -> u64 {
    imm as i32 as i64 as u64
}

/// `2^x / divisor` for the largest `x` keeping the result below `2^64`.
///
/// `divisor` must be neither zero nor a power of two.
pub fn reciprocal(divisor: u32) -> u64 {
    debug_assert!(divisor != 0 && !divisor.is_power_of_two());
    const P2EXP63: u64 = 1 << 63;
    let divisor = u64::from(divisor);
    let quotient = P2EXP63 / divisor;
    let remainder = P2EXP63 % divisor;
    let shift = 64 - divisor.leading_zeros();
    (quotient << shift).wrapping_add((remainder << shift) / divisor)
}

// =============================================================================
// CPU MODEL
// =============================================================================

const CYCLE_MAP_SIZE: usize = SUPERSCALAR_LATENCY + 4;
const LOOK_FORWARD_CYCLES: usize = 4;
const MAX_THROWAWAY_COUNT: usize = 256;

const P0: u8 = 1;
const P1: u8 = 2;
const P5: u8 = 4;
const P01: u8 = P0 | P1;
const P05: u8 = P0 | P5;
const P015: u8 = P0 | P1 | P5;

/// x86 macro-op: an eliminated op uses no port, a simple op one, a
/// complex op two.
#[derive(Clone, Copy, Debug)]
struct MacroOp {
    latency: usize,
    uop1: u8,
    uop2: u8,
    dependent: bool,
}

impl MacroOp {
    const fn new(latency: usize, uop1: u8, uop2: u8) -> Self {
        Self { latency, uop1, uop2, dependent: false }
    }

    const fn dependent(self) -> Self {
        Self { dependent: true, ..self }
    }

    fn is_eliminated(&self) -> bool {
        self.uop1 == 0
    }

    fn is_simple(&self) -> bool {
        self.uop2 == 0
    }
}

const SUB_RR: MacroOp = MacroOp::new(1, P015, 0);
const XOR_RR: MacroOp = MacroOp::new(1, P015, 0);
const IMUL_R: MacroOp = MacroOp::new(4, P1, P5);
const MUL_R: MacroOp = MacroOp::new(4, P1, P5);
const MOV_RR: MacroOp = MacroOp::new(0, 0, 0);
const LEA_SIB: MacroOp = MacroOp::new(1, P01, 0);
const IMUL_RR: MacroOp = MacroOp::new(3, P1, 0);
const ROR_RI: MacroOp = MacroOp::new(1, P05, 0);
const ADD_RI: MacroOp = MacroOp::new(1, P015, 0);
const XOR_RI: MacroOp = MacroOp::new(1, P015, 0);
const MOV_RI64: MacroOp = MacroOp::new(1, P015, 0);

/// Static description of an instruction: its macro-ops and which of them
/// reads the source, picks the destination and produces the result.
struct InstructionInfo {
    opcode: Option<SuperscalarOpcode>,
    ops: &'static [MacroOp],
    result_op: usize,
    dst_op: usize,
    src_op: Option<usize>,
}

impl InstructionInfo {
    const fn simple(opcode: SuperscalarOpcode, op: &'static [MacroOp], reads_source: bool) -> Self {
        Self {
            opcode: Some(opcode),
            ops: op,
            result_op: 0,
            dst_op: 0,
            src_op: if reads_source { Some(0) } else { None },
        }
    }
}

static INFO_NOP: InstructionInfo = InstructionInfo { opcode: None, ops: &[], result_op: 0, dst_op: 0, src_op: None };
static INFO_ISUB_R: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::ISUB_R, &[SUB_RR], true);
static INFO_IXOR_R: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::IXOR_R, &[XOR_RR], true);
static INFO_IADD_RS: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::IADD_RS, &[LEA_SIB], true);
static INFO_IMUL_R: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::IMUL_R, &[IMUL_RR], true);
static INFO_IROR_C: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::IROR_C, &[ROR_RI], false);
static INFO_IADD_C7: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::IADD_C7, &[ADD_RI], false);
static INFO_IXOR_C7: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::IXOR_C7, &[XOR_RI], false);
static INFO_IADD_C8: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::IADD_C8, &[ADD_RI], false);
static INFO_IXOR_C8: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::IXOR_C8, &[XOR_RI], false);
static INFO_IADD_C9: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::IADD_C9, &[ADD_RI], false);
static INFO_IXOR_C9: InstructionInfo = InstructionInfo::simple(SuperscalarOpcode::IXOR_C9, &[XOR_RI], false);
static INFO_IMULH_R: InstructionInfo = InstructionInfo {
    opcode: Some(SuperscalarOpcode::IMULH_R),
    ops: &[MOV_RR, MUL_R, MOV_RR],
    result_op: 1,
    dst_op: 0,
    src_op: Some(1),
};
static INFO_ISMULH_R: InstructionInfo = InstructionInfo {
    opcode: Some(SuperscalarOpcode::ISMULH_R),
    ops: &[MOV_RR, IMUL_R, MOV_RR],
    result_op: 1,
    dst_op: 0,
    src_op: Some(1),
};
static INFO_IMUL_RCP: InstructionInfo = InstructionInfo {
    opcode: Some(SuperscalarOpcode::IMUL_RCP),
    ops: &[MOV_RI64, IMUL_RR.dependent()],
    result_op: 1,
    dst_op: 1,
    src_op: None,
};

static SLOT_3: [&InstructionInfo; 2] = [&INFO_ISUB_R, &INFO_IXOR_R];
static SLOT_3L: [&InstructionInfo; 4] = [&INFO_ISUB_R, &INFO_IXOR_R, &INFO_IMULH_R, &INFO_ISMULH_R];
static SLOT_4: [&InstructionInfo; 2] = [&INFO_IROR_C, &INFO_IADD_RS];
static SLOT_7: [&InstructionInfo; 2] = [&INFO_IXOR_C7, &INFO_IADD_C7];
static SLOT_8: [&InstructionInfo; 2] = [&INFO_IXOR_C8, &INFO_IADD_C8];
static SLOT_9: [&InstructionInfo; 2] = [&INFO_IXOR_C9, &INFO_IADD_C9];

/// Decode buffer shapes: how 16 bytes of x86 code split into instructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Decoder {
    D484,
    D7333,
    D3733,
    D493,
    D4444,
    D3310,
}

impl Decoder {
    fn lengths(self) -> &'static [usize] {
        match self {
            Self::D484 => &[4, 8, 4],
            Self::D7333 => &[7, 3, 3, 3],
            Self::D3733 => &[3, 7, 3, 3],
            Self::D493 => &[4, 9, 3],
            Self::D4444 => &[4, 4, 4, 4],
            Self::D3310 => &[3, 3, 10],
        }
    }

    fn next(current: Option<SuperscalarOpcode>, cycle: usize, mul_count: usize, gen: &mut Blake2Generator) -> Self {
        // A multiply-high needs the 3-3-10 shape for its trailing mov.
        if matches!(current, Some(SuperscalarOpcode::IMULH_R | SuperscalarOpcode::ISMULH_R)) {
            return Self::D3310;
        }
        // Keep the multiplication port saturated.
        if mul_count < cycle + 1 {
            return Self::D4444;
        }
        if current == Some(SuperscalarOpcode::IMUL_RCP) {
            return if gen.next_byte() & 1 == 1 { Self::D484 } else { Self::D493 };
        }
        match gen.next_byte() & 3 {
            0 => Self::D484,
            1 => Self::D7333,
            2 => Self::D3733,
            _ => Self::D493,
        }
    }
}

fn schedule_uop(uop: u8, ports: &mut [[u8; 3]; CYCLE_MAP_SIZE], mut cycle: usize, commit: bool) -> Option<usize> {
    while cycle < CYCLE_MAP_SIZE {
        // P5 first, then P0, then P1.
        for (mask, port) in [(P5, 2), (P0, 0), (P1, 1)] {
            if uop & mask != 0 && ports[cycle][port] == 0 {
                if commit {
                    ports[cycle][port] = uop;
                }
                return Some(cycle);
            }
        }
        cycle += 1;
    }
    None
}

fn schedule_mop(
    mop: &MacroOp,
    ports: &mut [[u8; 3]; CYCLE_MAP_SIZE],
    mut cycle: usize,
    dep_cycle: usize,
    commit: bool,
) -> Option<usize> {
    if mop.dependent {
        cycle = cycle.max(dep_cycle);
    }
    if mop.is_eliminated() {
        return Some(cycle);
    }
    if mop.is_simple() {
        return schedule_uop(mop.uop1, ports, cycle, commit);
    }
    while cycle < CYCLE_MAP_SIZE {
        let cycle1 = schedule_uop(mop.uop1, ports, cycle, false);
        let cycle2 = schedule_uop(mop.uop2, ports, cycle, false);
        if let (Some(c1), Some(c2)) = (cycle1, cycle2) {
            if c1 == c2 {
                if commit {
                    schedule_uop(mop.uop1, ports, c1, true);
                    schedule_uop(mop.uop2, ports, c2, true);
                }
                return Some(c1);
            }
        }
        cycle += 1;
    }
    None
}

/// Per-register scheduling state.
#[derive(Clone, Copy, Default)]
struct RegisterState {
    latency: usize,
    last_op_group: Option<SuperscalarOpcode>,
    last_op_par: i64,
}

fn select_register(available: &[usize], gen: &mut Blake2Generator) -> Option<usize> {
    match available.len() {
        0 => None,
        1 => Some(available[0]),
        n => Some(available[(gen.next_u32() % n as u32) as usize]),
    }
}

/// The instruction currently being issued.
struct Candidate {
    info: &'static InstructionInfo,
    dst: Option<usize>,
    src: Option<usize>,
    imm32: u32,
    mod_shift: u32,
    op_group: SuperscalarOpcode,
    op_group_par: i64,
    group_par_is_source: bool,
    can_reuse: bool,
}

impl Candidate {
    fn nop() -> Self {
        Self {
            info: &INFO_NOP,
            dst: None,
            src: None,
            imm32: 0,
            mod_shift: 0,
            op_group: SuperscalarOpcode::ISUB_R,
            op_group_par: -1,
            group_par_is_source: false,
            can_reuse: false,
        }
    }

    fn create(info: &'static InstructionInfo, opcode: SuperscalarOpcode, gen: &mut Blake2Generator) -> Self {
        let mut c = Self { info, ..Self::nop() };
        match opcode {
            SuperscalarOpcode::ISUB_R => {
                c.op_group = SuperscalarOpcode::IADD_RS;
                c.group_par_is_source = true;
            }
            SuperscalarOpcode::IXOR_R => {
                c.op_group = SuperscalarOpcode::IXOR_R;
                c.group_par_is_source = true;
            }
            SuperscalarOpcode::IADD_RS => {
                c.mod_shift = u32::from((gen.next_byte() >> 2) % 4);
                c.op_group = SuperscalarOpcode::IADD_RS;
                c.group_par_is_source = true;
            }
            SuperscalarOpcode::IMUL_R => {
                c.op_group = SuperscalarOpcode::IMUL_R;
                c.group_par_is_source = true;
            }
            SuperscalarOpcode::IROR_C => {
                while c.imm32 == 0 {
                    c.imm32 = u32::from(gen.next_byte() & 63);
                }
                c.op_group = SuperscalarOpcode::IROR_C;
            }
            SuperscalarOpcode::IADD_C7 | SuperscalarOpcode::IADD_C8 | SuperscalarOpcode::IADD_C9 => {
                c.imm32 = gen.next_u32();
                c.op_group = SuperscalarOpcode::IADD_C7;
            }
            SuperscalarOpcode::IXOR_C7 | SuperscalarOpcode::IXOR_C8 | SuperscalarOpcode::IXOR_C9 => {
                c.imm32 = gen.next_u32();
                c.op_group = SuperscalarOpcode::IXOR_C7;
            }
            SuperscalarOpcode::IMULH_R | SuperscalarOpcode::ISMULH_R => {
                c.can_reuse = true;
                c.op_group = opcode;
                c.op_group_par = i64::from(gen.next_u32());
            }
            SuperscalarOpcode::IMUL_RCP => {
                loop {
                    c.imm32 = gen.next_u32();
                    if c.imm32 != 0 && !c.imm32.is_power_of_two() {
                        break;
                    }
                }
                c.op_group = SuperscalarOpcode::IMUL_RCP;
            }
        }
        c
    }

    fn for_slot(length: usize, decoder: Decoder, is_last: bool, gen: &mut Blake2Generator) -> Self {
        let info = match length {
            3 if is_last => SLOT_3L[(gen.next_byte() & 3) as usize],
            3 => SLOT_3[(gen.next_byte() & 1) as usize],
            // The 4-4-4-4 buffer issues multiplications in its first three slots.
            4 if decoder == Decoder::D4444 && !is_last => &INFO_IMUL_R,
            4 => SLOT_4[(gen.next_byte() & 1) as usize],
            7 => SLOT_7[(gen.next_byte() & 1) as usize],
            8 => SLOT_8[(gen.next_byte() & 1) as usize],
            9 => SLOT_9[(gen.next_byte() & 1) as usize],
            _ => &INFO_IMUL_RCP,
        };
        match info.opcode {
            Some(opcode) => Self::create(info, opcode, gen),
            None => Self::nop(),
        }
    }

    fn opcode(&self) -> Option<SuperscalarOpcode> {
        self.info.opcode
    }

    fn uop_count(&self) -> usize {
        self.info.ops.len()
    }

    fn select_source(&mut self, cycle: usize, registers: &[RegisterState; REGISTER_COUNT], gen: &mut Blake2Generator) -> bool {
        let available: Vec<usize> = (0..REGISTER_COUNT).filter(|&i| registers[i].latency <= cycle).collect();

        if available.len() == 2
            && self.opcode() == Some(SuperscalarOpcode::IADD_RS)
            && available.contains(&REGISTER_NEEDS_DISPLACEMENT)
        {
            self.src = Some(REGISTER_NEEDS_DISPLACEMENT);
            self.op_group_par = REGISTER_NEEDS_DISPLACEMENT as i64;
            return true;
        }

        match select_register(&available, gen) {
            Some(reg) => {
                self.src = Some(reg);
                if self.group_par_is_source {
                    self.op_group_par = reg as i64;
                }
                true
            }
            None => false,
        }
    }

    fn select_destination(
        &mut self,
        cycle: usize,
        allow_chained_mul: bool,
        registers: &[RegisterState; REGISTER_COUNT],
        gen: &mut Blake2Generator,
    ) -> bool {
        let available: Vec<usize> = (0..REGISTER_COUNT)
            .filter(|&i| {
                let reg = &registers[i];
                reg.latency <= cycle
                    && (self.can_reuse || Some(i) != self.src)
                    && (allow_chained_mul
                        || self.op_group != SuperscalarOpcode::IMUL_R
                        || reg.last_op_group != Some(SuperscalarOpcode::IMUL_R))
                    && (reg.last_op_group != Some(self.op_group) || reg.last_op_par != self.op_group_par)
                    && (self.opcode() != Some(SuperscalarOpcode::IADD_RS) || i != REGISTER_NEEDS_DISPLACEMENT)
            })
            .collect();

        match select_register(&available, gen) {
            Some(reg) => {
                self.dst = Some(reg);
                true
            }
            None => false,
        }
    }

    fn finish(&self) -> Option<SuperscalarInstruction> {
        let opcode = self.opcode()?;
        let dst = self.dst?;
        let src = self.src.unwrap_or(dst);
        let imm = match opcode {
            SuperscalarOpcode::IADD_RS => u64::from(self.mod_shift),
            SuperscalarOpcode::IROR_C => u64::from(self.imm32),
            SuperscalarOpcode::IMUL_RCP => reciprocal(self.imm32),
            SuperscalarOpcode::IADD_C7
            | SuperscalarOpcode::IADD_C8
            | SuperscalarOpcode::IADD_C9
            | SuperscalarOpcode::IXOR_C7
            | SuperscalarOpcode::IXOR_C8
            | SuperscalarOpcode::IXOR_C9 => sign_extend(self.imm32),
            _ => 0,
        };
        Some(SuperscalarInstruction {
            opcode,
            dst: dst as u8,
            src: src as u8,
            imm,
        })
    }
}

// =============================================================================
// GENERATOR
// =============================================================================

struct Builder {
    ports: [[u8; 3]; CYCLE_MAP_SIZE],
    registers: [RegisterState; REGISTER_COUNT],
    program: Vec<SuperscalarInstruction>,
}

impl Builder {
    fn new() -> Self {
        Self {
            ports: [[0; 3]; CYCLE_MAP_SIZE],
            registers: [RegisterState { latency: 0, last_op_group: None, last_op_par: -1 }; REGISTER_COUNT],
            program: Vec::with_capacity(SUPERSCALAR_MAX_SIZE),
        }
    }

    fn build(mut self, gen: &mut Blake2Generator) -> SuperscalarProgram {
        let mut current = Candidate::nop();
        let mut cycle = 0usize;
        let mut dep_cycle = 0usize;
        let mut mul_count = 0usize;
        let mut ports_saturated = false;
        let mut macro_op_index = 0usize;
        let mut throw_away_count = 0usize;

        let mut decode_cycle = 0;
        while decode_cycle < SUPERSCALAR_LATENCY && !ports_saturated && self.program.len() < SUPERSCALAR_MAX_SIZE {
            let decoder = Decoder::next(current.opcode(), decode_cycle, mul_count, gen);
            let lengths = decoder.lengths();
            let mut buffer_index = 0;

            while buffer_index < lengths.len() {
                let top_cycle = cycle;

                if macro_op_index >= current.uop_count() {
                    if ports_saturated || self.program.len() >= SUPERSCALAR_MAX_SIZE {
                        break;
                    }
                    let is_last = buffer_index + 1 == lengths.len();
                    current = Candidate::for_slot(lengths[buffer_index], decoder, is_last, gen);
                    macro_op_index = 0;
                }

                let mop = current.info.ops[macro_op_index];

                // Earliest cycle at which all uops of this macro-op can issue.
                let Some(mut schedule_cycle) = schedule_mop(&mop, &mut self.ports, cycle, dep_cycle, false) else {
                    ports_saturated = true;
                    break;
                };

                if current.info.src_op == Some(macro_op_index) {
                    let mut forward = 0;
                    while forward < LOOK_FORWARD_CYCLES && !current.select_source(schedule_cycle, &self.registers, gen) {
                        schedule_cycle += 1;
                        cycle += 1;
                        forward += 1;
                    }
                    if forward == LOOK_FORWARD_CYCLES {
                        if throw_away_count < MAX_THROWAWAY_COUNT {
                            throw_away_count += 1;
                            macro_op_index = current.uop_count();
                            continue;
                        }
                        current = Candidate::nop();
                        break;
                    }
                }

                if current.info.dst_op == macro_op_index {
                    let mut forward = 0;
                    while forward < LOOK_FORWARD_CYCLES
                        && !current.select_destination(schedule_cycle, throw_away_count > 0, &self.registers, gen)
                    {
                        schedule_cycle += 1;
                        cycle += 1;
                        forward += 1;
                    }
                    if forward == LOOK_FORWARD_CYCLES {
                        if throw_away_count < MAX_THROWAWAY_COUNT {
                            throw_away_count += 1;
                            macro_op_index = current.uop_count();
                            continue;
                        }
                        current = Candidate::nop();
                        break;
                    }
                }
                throw_away_count = 0;

                // Reschedule now that operand availability is known.
                let Some(schedule_cycle) = schedule_mop(&mop, &mut self.ports, schedule_cycle, schedule_cycle, true)
                else {
                    ports_saturated = true;
                    break;
                };
                dep_cycle = schedule_cycle + mop.latency;

                if current.info.result_op == macro_op_index {
                    if let Some(dst) = current.dst {
                        let reg = &mut self.registers[dst];
                        reg.latency = dep_cycle;
                        reg.last_op_group = Some(current.op_group);
                        reg.last_op_par = current.op_group_par;
                    }
                }

                buffer_index += 1;
                macro_op_index += 1;

                if schedule_cycle >= SUPERSCALAR_LATENCY {
                    ports_saturated = true;
                }
                cycle = top_cycle;

                if macro_op_index >= current.uop_count() {
                    if let Some(instr) = current.finish() {
                        if instr.opcode.is_multiplication() {
                            mul_count += 1;
                        }
                        self.program.push(instr);
                    }
                }
            }
            cycle += 1;
            decode_cycle += 1;
        }

        let address_register = Self::address_register(&self.program);
        tracing::trace!(
            instructions = self.program.len(),
            address_register,
            "superscalar program generated"
        );
        SuperscalarProgram {
            instructions: self.program,
            address_register,
        }
    }

    /// Register with the longest dependency chain under unit latencies;
    /// ties go to the lowest index.
    fn address_register(program: &[SuperscalarInstruction]) -> usize {
        let mut latencies = [0usize; REGISTER_COUNT];
        for instr in program {
            let dst = instr.dst as usize;
            let src = instr.src as usize;
            let lat_dst = latencies[dst] + 1;
            let lat_src = if dst != src { latencies[src] + 1 } else { 0 };
            latencies[dst] = lat_dst.max(lat_src);
        }

        let mut max = 0;
        let mut reg = 0;
        for (i, &lat) in latencies.iter().enumerate() {
            if lat > max {
                max = lat;
                reg = i;
            }
        }
        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reciprocal_known_values() {
        assert_eq!(reciprocal(3), 12297829382473034410);
        assert_eq!(reciprocal(13), 11351842506898185609);
        assert_eq!(reciprocal(33), 17887751829051686415);
        assert_eq!(reciprocal(65537), 18446462603027742720);
        assert_eq!(reciprocal(15000001), 10316166306300415204);
        assert_eq!(reciprocal(3845182035), 10302264209224146340);
        assert_eq!(reciprocal(0xffff_ffff), 9223372039002259456);
    }

    #[test]
    fn multiply_high() {
        assert_eq!(mulh(u64::MAX, u64::MAX), u64::MAX - 1);
        assert_eq!(mulh(1 << 32, 1 << 32), 1);
        assert_eq!(smulh(u64::MAX, u64::MAX), 0);
        assert_eq!(smulh((-1i64) as u64, 5), u64::MAX);
        assert_eq!(smulh(i64::MIN as u64, 2), u64::MAX);
    }

    #[test]
    fn sign_extension() {
        assert_eq!(sign_extend(0x7fff_ffff), 0x7fff_ffff);
        assert_eq!(sign_extend(0x8000_0000), 0xffff_ffff_8000_0000);
        assert_eq!(sign_extend(u32::MAX), u64::MAX);
    }

    #[test]
    fn generation_is_deterministic() {
        let mut a = Blake2Generator::new(b"test key 000", 0);
        let mut b = Blake2Generator::new(b"test key 000", 0);
        let pa = SuperscalarProgram::generate(&mut a);
        let pb = SuperscalarProgram::generate(&mut b);
        assert_eq!(pa.instructions(), pb.instructions());
        assert_eq!(pa.address_register(), pb.address_register());
    }

    #[test]
    fn programs_are_well_formed() {
        let mut gen = Blake2Generator::new(b"superscalar", 0);
        for _ in 0..8 {
            let program = SuperscalarProgram::generate(&mut gen);
            assert!(!program.is_empty());
            assert!(program.len() <= SUPERSCALAR_MAX_SIZE);
            assert!(program.address_register() < REGISTER_COUNT);
            for instr in program.instructions() {
                assert!((instr.dst as usize) < REGISTER_COUNT);
                assert!((instr.src as usize) < REGISTER_COUNT);
                match instr.opcode {
                    SuperscalarOpcode::IADD_RS => {
                        assert!(instr.imm < 4);
                        assert_ne!(instr.dst as usize, REGISTER_NEEDS_DISPLACEMENT);
                    }
                    SuperscalarOpcode::IROR_C => assert!((1..64).contains(&instr.imm)),
                    SuperscalarOpcode::ISUB_R
                    | SuperscalarOpcode::IXOR_R
                    | SuperscalarOpcode::IMUL_R => assert_ne!(instr.dst, instr.src),
                    _ => {}
                }
            }
        }
    }

    #[test]
    fn execute_applies_each_opcode() {
        let program = SuperscalarProgram {
            instructions: vec![
                SuperscalarInstruction { opcode: SuperscalarOpcode::IADD_C7, dst: 0, src: 0, imm: sign_extend(0xffff_fffe) },
                SuperscalarInstruction { opcode: SuperscalarOpcode::IADD_RS, dst: 1, src: 2, imm: 3 },
                SuperscalarInstruction { opcode: SuperscalarOpcode::IROR_C, dst: 3, src: 3, imm: 4 },
                SuperscalarInstruction { opcode: SuperscalarOpcode::IMUL_RCP, dst: 4, src: 4, imm: reciprocal(3) },
                SuperscalarInstruction { opcode: SuperscalarOpcode::ISUB_R, dst: 5, src: 6, imm: 0 },
            ],
            address_register: 0,
        };
        let mut regs = [10, 1, 2, 0x1, 3, 0, 1, 0];
        program.execute(&mut regs);
        assert_eq!(regs[0], 8);
        assert_eq!(regs[1], 17);
        assert_eq!(regs[3], 1 << 60);
        assert_eq!(regs[4], 3u64.wrapping_mul(12297829382473034410));
        assert_eq!(regs[5], u64::MAX);
    }

    #[test]
    fn address_register_is_longest_chain() {
        let chain = |dst, src| SuperscalarInstruction { opcode: SuperscalarOpcode::IXOR_R, dst, src, imm: 0 };
        let program = [chain(2, 1), chain(3, 2), chain(3, 1), chain(1, 0)];
        assert_eq!(Builder::address_register(&program), 3);
        assert_eq!(Builder::address_register(&[]), 0);
    }
}
