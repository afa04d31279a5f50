//! AES Scratchpad Generators and Hash
//!
//! Three 4-lane AES constructions drive the VM:
//! - `fill_aes_1rx4`: one round per 16 output bytes, fills the scratchpad.
//! - `fill_aes_4rx4`: four rounds per 16 output bytes, generates each program.
//! - `hash_aes_1rx4`: absorbs the final scratchpad into 64 bytes.
//!
//! The backend (AES-NI or portable tables) is chosen once per VM; both
//! produce identical bytes.

// =============================================================================
// MODULES
// =============================================================================

#[cfg(target_arch = "x86_64")]
mod hard;
mod soft;

use crate::flags::Flags;
use crate::keys::{keys, AesKey};

// =============================================================================
// BACKEND SELECTION
// =============================================================================

/// True if the running CPU exposes AES-NI.
pub fn hardware_available() -> bool {
    #[cfg(target_arch = "x86_64")]
    {
        is_x86_feature_detected!("aes") && is_x86_feature_detected!("sse2")
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        false
    }
}

/// Implementation used for the AES constructions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AesBackend {
    /// Lookup-table rounds, available everywhere.
    Portable,
    /// AES-NI rounds; only constructed after runtime detection.
    AesNi,
}

impl AesBackend {
    /// Honours `HARD_AES` when the CPU supports it, portable otherwise.
    pub fn select(flags: Flags) -> Self {
        if flags.contains(Flags::HARD_AES) {
            if hardware_available() {
                return Self::AesNi;
            }
            tracing::debug!("HARD_AES requested but AES-NI is unavailable, using tables");
        }
        Self::Portable
    }

    /// Fills `output` from `state`, one AES round per lane per 64 bytes.
    /// The advanced state is written back.
    ///
    /// # Panics
    /// If `output.len()` is not a multiple of 64.
    pub fn fill_aes_1rx4(self, state: &mut [u8; 64], output: &mut [u8]) {
        assert_eq!(output.len() % 64, 0, "output must be a multiple of 64 bytes");
        match self {
            #[cfg(target_arch = "x86_64")]
            // SAFETY: AesNi is only selected after AES-NI detection.
            #[allow(unsafe_code)]
            Self::AesNi => unsafe { hard::fill_aes_1rx4(state, output) },
            _ => portable_fill_aes_1rx4(state, output),
        }
    }

    /// Fills `output` from a copy of `state` with four AES rounds per lane
    /// per 64 bytes.
    ///
    /// # Panics
    /// If `output.len()` is not a multiple of 64.
    pub fn fill_aes_4rx4(self, state: &[u8; 64], output: &mut [u8]) {
        assert_eq!(output.len() % 64, 0, "output must be a multiple of 64 bytes");
        match self {
            #[cfg(target_arch = "x86_64")]
            // SAFETY: AesNi is only selected after AES-NI detection.
            #[allow(unsafe_code)]
            Self::AesNi => unsafe { hard::fill_aes_4rx4(state, output) },
            _ => portable_fill_aes_4rx4(state, output),
        }
    }

    /// Hashes `input` into 64 bytes, using each 64-byte block as round keys.
    ///
    /// # Panics
    /// If `input.len()` is not a multiple of 64.
    pub fn hash_aes_1rx4(self, input: &[u8]) -> [u8; 64] {
        assert_eq!(input.len() % 64, 0, "input must be a multiple of 64 bytes");
        match self {
            #[cfg(target_arch = "x86_64")]
            // SAFETY: AesNi is only selected after AES-NI detection.
            #[allow(unsafe_code)]
            Self::AesNi => unsafe { hard::hash_aes_1rx4(input) },
            _ => portable_hash_aes_1rx4(input),
        }
    }
}

// =============================================================================
// PORTABLE CONSTRUCTIONS
// =============================================================================

fn lanes_from_bytes(bytes: &[u8]) -> [AesKey; 4] {
    core::array::from_fn(|lane| {
        core::array::from_fn(|col| {
            let at = lane * 16 + col * 4;
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        })
    })
}

fn lanes_to_bytes(lanes: &[AesKey; 4], out: &mut [u8]) {
    for (lane, words) in lanes.iter().enumerate() {
        for (col, word) in words.iter().enumerate() {
            let at = lane * 16 + col * 4;
            out[at..at + 4].copy_from_slice(&word.to_le_bytes());
        }
    }
}

fn portable_fill_aes_1rx4(state: &mut [u8; 64], output: &mut [u8]) {
    let k = &keys().aes_generator_1r;
    let mut s = lanes_from_bytes(&state[..]);
    for chunk in output.chunks_exact_mut(64) {
        soft::round_dec_enc(&mut s, [&k[0], &k[1], &k[2], &k[3]]);
        lanes_to_bytes(&s, chunk);
    }
    lanes_to_bytes(&s, &mut state[..]);
}

fn portable_fill_aes_4rx4(state: &[u8; 64], output: &mut [u8]) {
    let k = &keys().aes_generator_4r;
    let mut s = lanes_from_bytes(&state[..]);
    for chunk in output.chunks_exact_mut(64) {
        for r in 0..4 {
            soft::round_dec_enc(&mut s, [&k[r], &k[r], &k[r + 4], &k[r + 4]]);
        }
        lanes_to_bytes(&s, chunk);
    }
}

fn portable_hash_aes_1rx4(input: &[u8]) -> [u8; 64] {
    let all = keys();
    let mut s = all.aes_hash_1r_state;
    for chunk in input.chunks_exact(64) {
        let m = lanes_from_bytes(chunk);
        soft::round_enc_dec(&mut s, [&m[0], &m[1], &m[2], &m[3]]);
    }
    for x in &all.aes_hash_1r_xkeys {
        soft::round_enc_dec(&mut s, [x, x, x, x]);
    }
    let mut out = [0u8; 64];
    lanes_to_bytes(&s, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> [u8; 64] {
        core::array::from_fn(|i| (i as u8).wrapping_mul(37).wrapping_add(11))
    }

    #[test]
    fn fill_1rx4_advances_state() {
        let mut state = seed();
        let mut out = vec![0u8; 256];
        AesBackend::Portable.fill_aes_1rx4(&mut state, &mut out);
        // The state equals the last block written.
        assert_eq!(&out[192..], &state[..]);
        assert_ne!(&out[..64], &out[64..128]);
    }

    #[test]
    fn fill_1rx4_is_resumable() {
        let mut whole_state = seed();
        let mut whole = vec![0u8; 512];
        AesBackend::Portable.fill_aes_1rx4(&mut whole_state, &mut whole);

        let mut split_state = seed();
        let mut split = vec![0u8; 512];
        let (a, b) = split.split_at_mut(192);
        AesBackend::Portable.fill_aes_1rx4(&mut split_state, a);
        AesBackend::Portable.fill_aes_1rx4(&mut split_state, b);

        assert_eq!(whole, split);
        assert_eq!(whole_state, split_state);
    }

    #[test]
    fn fill_4rx4_leaves_state_untouched() {
        let state = seed();
        let mut a = vec![0u8; 128];
        let mut b = vec![0u8; 128];
        AesBackend::Portable.fill_aes_4rx4(&state, &mut a);
        AesBackend::Portable.fill_aes_4rx4(&state, &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn hash_depends_on_every_block() {
        let mut input = vec![0u8; 1024];
        let base = AesBackend::Portable.hash_aes_1rx4(&input);
        input[1000] ^= 1;
        assert_ne!(base, AesBackend::Portable.hash_aes_1rx4(&input));
    }

    #[test]
    fn hardware_matches_portable() {
        if !hardware_available() {
            return;
        }
        let hard = AesBackend::select(Flags::HARD_AES);
        assert_eq!(hard, AesBackend::AesNi);

        let mut soft_state = seed();
        let mut hard_state = seed();
        let mut soft_out = vec![0u8; 4096];
        let mut hard_out = vec![0u8; 4096];
        AesBackend::Portable.fill_aes_1rx4(&mut soft_state, &mut soft_out);
        hard.fill_aes_1rx4(&mut hard_state, &mut hard_out);
        assert_eq!(soft_out, hard_out);
        assert_eq!(soft_state, hard_state);

        AesBackend::Portable.fill_aes_4rx4(&seed(), &mut soft_out);
        hard.fill_aes_4rx4(&seed(), &mut hard_out);
        assert_eq!(soft_out, hard_out);

        assert_eq!(
            AesBackend::Portable.hash_aes_1rx4(&soft_out),
            hard.hash_aes_1rx4(&hard_out)
        );
    }

    #[test]
    fn default_flags_select_portable() {
        assert_eq!(AesBackend::select(Flags::DEFAULT), AesBackend::Portable);
    }
}
