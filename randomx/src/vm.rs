//! RandomX Virtual Machine
//!
//! The RandomX VM has:
//! - 8 integer registers (r0-r7)
//! - 4 floating point register pairs each in groups F, E and A
//! - A 2 MiB scratchpad
//! - Memory address registers (ma, mx) into the dataset
//!
//! Each round generates a program, compiles it to bytecode and runs it for
//! 2048 iterations, mixing the scratchpad and one dataset item per
//! iteration into the registers. The rounding mode selected by CFROUND is
//! part of the register file and applied in software.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::aes::AesBackend;
use crate::cache::{Cache, RegisterLine};
use crate::config::{
    CACHE_LINE_ALIGN_MASK, CACHE_LINE_SIZE, DATASET_EXTRA_ITEMS, PROGRAM_ITERATIONS, PROGRAM_SIZE, REGISTER_COUNT,
    REGISTER_COUNT_FLT, REGISTER_FILE_SIZE, SCRATCHPAD_L3_MASK64,
};
use crate::dataset::{Dataset, DatasetView};
use crate::error::{Error, Result};
use crate::flags::Flags;
use crate::program::{ByteCode, Instruction, Program};
use crate::scratchpad::Scratchpad;
use crate::softfloat::{self, e_mask, mask_register_exponent_mantissa, scale_negate, small_positive_float_bits, RoundingMode};
use crate::superscalar::{mulh, smulh};

// =============================================================================
// REGISTER FILE
// =============================================================================

/// Floating point register: two doubles, low lane first.
pub type FloatRegister = [f64; 2];

/// Full mutable VM state for one round.
#[derive(Clone, Debug, Default)]
pub struct RegisterFile {
    /// Integer registers
    pub r: RegisterLine,
    /// F registers (additive group)
    pub f: [FloatRegister; REGISTER_COUNT_FLT],
    /// E registers (multiplicative group)
    pub e: [FloatRegister; REGISTER_COUNT_FLT],
    /// A registers (read-only during a round)
    pub a: [FloatRegister; REGISTER_COUNT_FLT],
    /// Mode applied to every float result
    pub rounding: RoundingMode,
}

impl RegisterFile {
    /// Zeroes every register. The rounding mode is kept.
    pub fn clear(&mut self) {
        self.r = [0; REGISTER_COUNT];
        self.f = [[0.0; 2]; REGISTER_COUNT_FLT];
        self.e = [[0.0; 2]; REGISTER_COUNT_FLT];
        self.a = [[0.0; 2]; REGISTER_COUNT_FLT];
    }

    /// Serialized as R, F, E, A, each word little-endian.
    pub fn to_bytes(&self) -> [u8; REGISTER_FILE_SIZE] {
        let mut bytes = [0u8; REGISTER_FILE_SIZE];
        let floats = self.f.iter().chain(&self.e).chain(&self.a).flatten().map(|v| v.to_bits());
        let words = self.r.iter().copied().chain(floats);
        for (chunk, word) in bytes.chunks_exact_mut(8).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        bytes
    }
}

/// Resets the rounding mode to nearest on creation and on every exit,
/// including unwinding.
pub(crate) struct RoundingGuard<'a> {
    vm: &'a mut Vm,
}

impl<'a> RoundingGuard<'a> {
    pub(crate) fn new(vm: &'a mut Vm) -> Self {
        vm.reg.rounding = RoundingMode::Nearest;
        Self { vm }
    }
}

impl Deref for RoundingGuard<'_> {
    type Target = Vm;

    fn deref(&self) -> &Vm {
        self.vm
    }
}

impl DerefMut for RoundingGuard<'_> {
    fn deref_mut(&mut self) -> &mut Vm {
        self.vm
    }
}

impl Drop for RoundingGuard<'_> {
    fn drop(&mut self) {
        self.vm.reg.rounding = RoundingMode::Nearest;
    }
}

// =============================================================================
// INTERPRETER
// =============================================================================

#[inline]
fn lanes(a: FloatRegister, b: FloatRegister, op: impl Fn(f64, f64) -> f64) -> FloatRegister {
    [op(a[0], b[0]), op(a[1], b[1])]
}

impl ByteCode {
    /// Runs the program once against `reg` and `pad`. `e_mask` holds the
    /// per-lane exponent masks for FDIV_M divisors.
    pub fn execute(&self, reg: &mut RegisterFile, pad: &mut Scratchpad, e_mask: &[u64; 2]) {
        use Instruction::*;

        let instructions = self.instructions();
        let mut pc = 0;
        while pc < PROGRAM_SIZE {
            let mode = reg.rounding;
            let r = &mut reg.r;
            match instructions[pc] {
                NOP => {}
                IADD_RS { dst, src, shift, imm } => {
                    let d = dst as usize;
                    r[d] = r[d].wrapping_add(r[src as usize] << shift).wrapping_add(imm);
                }
                IADD_M { dst, mem } => {
                    let value = pad.load64(mem.resolve(r));
                    r[dst as usize] = r[dst as usize].wrapping_add(value);
                }
                ISUB_R { dst, src } => r[dst as usize] = r[dst as usize].wrapping_sub(r[src as usize]),
                ISUB_I { dst, imm } => r[dst as usize] = r[dst as usize].wrapping_sub(imm),
                ISUB_M { dst, mem } => {
                    let value = pad.load64(mem.resolve(r));
                    r[dst as usize] = r[dst as usize].wrapping_sub(value);
                }
                IMUL_R { dst, src } => r[dst as usize] = r[dst as usize].wrapping_mul(r[src as usize]),
                IMUL_I { dst, imm } => r[dst as usize] = r[dst as usize].wrapping_mul(imm),
                IMUL_M { dst, mem } => {
                    let value = pad.load64(mem.resolve(r));
                    r[dst as usize] = r[dst as usize].wrapping_mul(value);
                }
                IMULH_R { dst, src } => r[dst as usize] = mulh(r[dst as usize], r[src as usize]),
                IMULH_M { dst, mem } => {
                    let value = pad.load64(mem.resolve(r));
                    r[dst as usize] = mulh(r[dst as usize], value);
                }
                ISMULH_R { dst, src } => r[dst as usize] = smulh(r[dst as usize], r[src as usize]),
                ISMULH_M { dst, mem } => {
                    let value = pad.load64(mem.resolve(r));
                    r[dst as usize] = smulh(r[dst as usize], value);
                }
                INEG_R { dst } => r[dst as usize] = r[dst as usize].wrapping_neg(),
                IXOR_R { dst, src } => r[dst as usize] ^= r[src as usize],
                IXOR_I { dst, imm } => r[dst as usize] ^= imm,
                IXOR_M { dst, mem } => {
                    let value = pad.load64(mem.resolve(r));
                    r[dst as usize] ^= value;
                }
                IROR_R { dst, src } => r[dst as usize] = r[dst as usize].rotate_right((r[src as usize] & 63) as u32),
                IROR_I { dst, imm } => r[dst as usize] = r[dst as usize].rotate_right((imm & 63) as u32),
                IROL_R { dst, src } => r[dst as usize] = r[dst as usize].rotate_left((r[src as usize] & 63) as u32),
                IROL_I { dst, imm } => r[dst as usize] = r[dst as usize].rotate_left((imm & 63) as u32),
                ISWAP_R { dst, src } => r.swap(dst as usize, src as usize),
                FSWAP_F { dst } => reg.f[dst as usize].swap(0, 1),
                FSWAP_E { dst } => reg.e[dst as usize].swap(0, 1),
                FADD_R { dst, src } => {
                    let d = dst as usize;
                    reg.f[d] = lanes(reg.f[d], reg.a[src as usize], |x, y| softfloat::add(x, y, mode));
                }
                FADD_M { dst, mem } => {
                    let d = dst as usize;
                    let value = pad.load32f(mem.resolve(r));
                    reg.f[d] = lanes(reg.f[d], value, |x, y| softfloat::add(x, y, mode));
                }
                FSUB_R { dst, src } => {
                    let d = dst as usize;
                    reg.f[d] = lanes(reg.f[d], reg.a[src as usize], |x, y| softfloat::sub(x, y, mode));
                }
                FSUB_M { dst, mem } => {
                    let d = dst as usize;
                    let value = pad.load32f(mem.resolve(r));
                    reg.f[d] = lanes(reg.f[d], value, |x, y| softfloat::sub(x, y, mode));
                }
                FSCAL_R { dst } => {
                    let d = dst as usize;
                    reg.f[d] = reg.f[d].map(scale_negate);
                }
                FMUL_R { dst, src } => {
                    let d = dst as usize;
                    reg.e[d] = lanes(reg.e[d], reg.a[src as usize], |x, y| softfloat::mul(x, y, mode));
                }
                FDIV_M { dst, mem } => {
                    let d = dst as usize;
                    let [lo, hi] = pad.load32f(mem.resolve(r));
                    let divisor = [
                        mask_register_exponent_mantissa(lo, e_mask[0]),
                        mask_register_exponent_mantissa(hi, e_mask[1]),
                    ];
                    reg.e[d] = lanes(reg.e[d], divisor, |x, y| softfloat::div(x, y, mode));
                }
                FSQRT_R { dst } => {
                    let d = dst as usize;
                    reg.e[d] = reg.e[d].map(|x| softfloat::sqrt(x, mode));
                }
                CBRANCH { reg: branch, imm, mask, target } => {
                    let b = branch as usize;
                    r[b] = r[b].wrapping_add(imm);
                    if r[b] & mask == 0 {
                        pc = target as usize;
                        continue;
                    }
                }
                CFROUND { src, rotate } => {
                    reg.rounding = RoundingMode::from(r[src as usize].rotate_right(rotate));
                }
                ISTORE { dst, src, imm, mask } => {
                    let addr = (r[dst as usize].wrapping_add(imm) as u32) & mask;
                    pad.store64(addr, r[src as usize]);
                }
            }
            pc += 1;
        }
    }
}

// =============================================================================
// VIRTUAL MACHINE
// =============================================================================

/// A hashing instance bound to one cache (light mode) or dataset (full mode).
///
/// A `Vm` is single-threaded and reused across hashes. Share the cache or
/// dataset between VMs through `Arc`.
pub struct Vm {
    flags: Flags,
    pub(crate) aes: AesBackend,
    pub(crate) scratchpad: Scratchpad,
    pub(crate) reg: RegisterFile,
    view: DatasetView,
}

impl Vm {
    /// Creates a VM. Light mode needs an initialized `cache`, full mode
    /// (`FULL_MEM`) needs a `dataset`.
    pub fn new(flags: Flags, cache: Option<Arc<Cache>>, dataset: Option<Arc<Dataset>>) -> Result<Self> {
        if flags.contains(Flags::JIT) {
            return Err(Error::Unsupported("JIT compilation"));
        }
        if flags.contains(Flags::LARGE_PAGES) {
            return Err(Error::Unsupported("large pages"));
        }

        let view = if flags.contains(Flags::FULL_MEM) {
            match (dataset, cache) {
                (Some(dataset), _) => DatasetView::Full(dataset),
                (None, Some(_)) => return Err(Error::ModeMismatch("cache")),
                (None, None) => return Err(Error::MissingDataset),
            }
        } else {
            match (cache, dataset) {
                (Some(cache), _) if cache.is_initialized() => DatasetView::Light(cache),
                (Some(_), _) => return Err(Error::MissingCache),
                (None, Some(_)) => return Err(Error::ModeMismatch("dataset")),
                (None, None) => return Err(Error::MissingCache),
            }
        };

        let aes = AesBackend::select(flags);
        tracing::debug!(?flags, ?aes, full = view.is_full(), "vm created");

        Ok(Self {
            flags,
            aes,
            scratchpad: Scratchpad::new()?,
            reg: RegisterFile::default(),
            view,
        })
    }

    /// Points a light mode VM at a new cache, e.g. after a key change.
    pub fn set_cache(&mut self, cache: Arc<Cache>) -> Result<()> {
        if self.flags.contains(Flags::FULL_MEM) {
            return Err(Error::ModeMismatch("cache"));
        }
        if !cache.is_initialized() {
            return Err(Error::MissingCache);
        }
        self.view = DatasetView::Light(cache);
        Ok(())
    }

    /// Points a full mode VM at a new dataset.
    pub fn set_dataset(&mut self, dataset: Arc<Dataset>) -> Result<()> {
        if !self.flags.contains(Flags::FULL_MEM) {
            return Err(Error::ModeMismatch("dataset"));
        }
        self.view = DatasetView::Full(dataset);
        Ok(())
    }

    /// Flags the VM was created with.
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Register file left by the last round.
    pub fn registers(&self) -> &RegisterFile {
        &self.reg
    }

    /// Generates, compiles and runs one program seeded by `seed`.
    pub(crate) fn run(&mut self, seed: &[u8; 64]) {
        let program = Program::generate(self.aes, seed);
        let entropy = &program.entropy;

        self.reg.clear();
        for (i, a) in self.reg.a.iter_mut().enumerate() {
            *a = [small_positive_float_bits(entropy[2 * i]), small_positive_float_bits(entropy[2 * i + 1])];
        }

        let mut ma = (entropy[8] & CACHE_LINE_ALIGN_MASK) as u32;
        let mut mx = entropy[10] as u32;
        let read_reg: [usize; 4] = core::array::from_fn(|i| 2 * i + ((entropy[12] >> i) & 1) as usize);
        let dataset_offset = (entropy[13] % (DATASET_EXTRA_ITEMS + 1)) * CACHE_LINE_SIZE as u64;
        let e_masks = [e_mask(entropy[14]), e_mask(entropy[15])];

        let reg = &mut self.reg;
        let pad = &mut self.scratchpad;
        let mut sp_addr0 = u64::from(mx);
        let mut sp_addr1 = u64::from(ma);

        for _ in 0..PROGRAM_ITERATIONS {
            let sp_mix = reg.r[read_reg[0]] ^ reg.r[read_reg[1]];
            sp_addr0 = (sp_addr0 ^ sp_mix) & SCRATCHPAD_L3_MASK64;
            sp_addr1 = (sp_addr1 ^ (sp_mix >> 32)) & SCRATCHPAD_L3_MASK64;
            let (sp0, sp1) = (sp_addr0 as u32, sp_addr1 as u32);

            for (i, r) in reg.r.iter_mut().enumerate() {
                *r ^= pad.load64(sp0 + 8 * i as u32);
            }
            for (i, f) in reg.f.iter_mut().enumerate() {
                *f = pad.load32f(sp1 + 8 * i as u32);
            }
            for (i, e) in reg.e.iter_mut().enumerate() {
                let [lo, hi] = pad.load32f(sp1 + 8 * (i + REGISTER_COUNT_FLT) as u32);
                *e = [
                    mask_register_exponent_mantissa(lo, e_masks[0]),
                    mask_register_exponent_mantissa(hi, e_masks[1]),
                ];
            }

            program.bytecode.execute(reg, pad, &e_masks);

            mx ^= (reg.r[read_reg[2]] ^ reg.r[read_reg[3]]) as u32;
            mx &= CACHE_LINE_ALIGN_MASK as u32;
            self.view.prefetch(dataset_offset + u64::from(mx));
            self.view.read(dataset_offset + u64::from(ma), &mut reg.r);
            std::mem::swap(&mut mx, &mut ma);

            for (i, r) in reg.r.iter().enumerate() {
                pad.store64(sp1 + 8 * i as u32, *r);
            }
            for (i, (f, e)) in reg.f.iter_mut().zip(&reg.e).enumerate() {
                *f = [
                    f64::from_bits(f[0].to_bits() ^ e[0].to_bits()),
                    f64::from_bits(f[1].to_bits() ^ e[1].to_bits()),
                ];
                let addr = sp0 + 16 * i as u32;
                pad.store64(addr, f[0].to_bits());
                pad.store64(addr + 8, f[1].to_bits());
            }

            sp_addr0 = 0;
            sp_addr1 = 0;
        }
    }
}

impl core::fmt::Debug for Vm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vm")
            .field("flags", &self.flags)
            .field("aes", &self.aes)
            .field("full", &self.view.is_full())
            .finish()
    }
}
