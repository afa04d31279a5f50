//! AES-NI kernels for the scratchpad generators and hash.

#![allow(clippy::cast_ptr_alignment)]

use core::arch::x86_64::{
    __m128i, _mm_aesdec_si128, _mm_aesenc_si128, _mm_loadu_si128, _mm_storeu_si128,
};

use crate::keys::{keys, AesKey};

#[inline(always)]
#[allow(unsafe_code)]
unsafe fn load_key(key: &AesKey) -> __m128i {
    // AesKey is four little-endian columns, the same byte order as the register.
    let mut bytes = [0u8; 16];
    for (c, word) in key.iter().enumerate() {
        bytes[c * 4..c * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }
    _mm_loadu_si128(bytes.as_ptr().cast())
}

#[inline(always)]
#[allow(unsafe_code)]
unsafe fn load_lanes(bytes: &[u8]) -> [__m128i; 4] {
    debug_assert!(bytes.len() >= 64);
    let ptr = bytes.as_ptr();
    [
        _mm_loadu_si128(ptr.cast()),
        _mm_loadu_si128(ptr.add(16).cast()),
        _mm_loadu_si128(ptr.add(32).cast()),
        _mm_loadu_si128(ptr.add(48).cast()),
    ]
}

#[inline(always)]
#[allow(unsafe_code)]
unsafe fn store_lanes(lanes: &[__m128i; 4], out: &mut [u8]) {
    debug_assert!(out.len() >= 64);
    let ptr = out.as_mut_ptr();
    _mm_storeu_si128(ptr.cast(), lanes[0]);
    _mm_storeu_si128(ptr.add(16).cast(), lanes[1]);
    _mm_storeu_si128(ptr.add(32).cast(), lanes[2]);
    _mm_storeu_si128(ptr.add(48).cast(), lanes[3]);
}

/// Hardware `fill_aes_1rx4`.
// SAFETY: Requires the AES CPU feature. All loads and stores stay inside
// 64-byte windows of `state`/`output`; the caller guarantees `output.len()`
// is a multiple of 64.
#[target_feature(enable = "aes")]
#[target_feature(enable = "sse2")]
#[allow(unsafe_code)]
pub unsafe fn fill_aes_1rx4(state: &mut [u8; 64], output: &mut [u8]) {
    let k = &keys().aes_generator_1r;
    let (k0, k1, k2, k3) = (load_key(&k[0]), load_key(&k[1]), load_key(&k[2]), load_key(&k[3]));

    let mut s = load_lanes(&state[..]);
    for chunk in output.chunks_exact_mut(64) {
        s[0] = _mm_aesdec_si128(s[0], k0);
        s[1] = _mm_aesenc_si128(s[1], k1);
        s[2] = _mm_aesdec_si128(s[2], k2);
        s[3] = _mm_aesenc_si128(s[3], k3);
        store_lanes(&s, chunk);
    }
    store_lanes(&s, &mut state[..]);
}

/// Hardware `fill_aes_4rx4`.
// SAFETY: Same contract as `fill_aes_1rx4`; `state` is only read.
#[target_feature(enable = "aes")]
#[target_feature(enable = "sse2")]
#[allow(unsafe_code)]
pub unsafe fn fill_aes_4rx4(state: &[u8; 64], output: &mut [u8]) {
    let k = &keys().aes_generator_4r;
    let rk: [__m128i; 8] = [
        load_key(&k[0]),
        load_key(&k[1]),
        load_key(&k[2]),
        load_key(&k[3]),
        load_key(&k[4]),
        load_key(&k[5]),
        load_key(&k[6]),
        load_key(&k[7]),
    ];

    let mut s = load_lanes(state);
    for chunk in output.chunks_exact_mut(64) {
        for r in 0..4 {
            s[0] = _mm_aesdec_si128(s[0], rk[r]);
            s[1] = _mm_aesenc_si128(s[1], rk[r]);
            s[2] = _mm_aesdec_si128(s[2], rk[r + 4]);
            s[3] = _mm_aesenc_si128(s[3], rk[r + 4]);
        }
        store_lanes(&s, chunk);
    }
}

/// Hardware `hash_aes_1rx4`.
// SAFETY: Requires the AES CPU feature; `input.len()` is a multiple of 64.
#[target_feature(enable = "aes")]
#[target_feature(enable = "sse2")]
#[allow(unsafe_code)]
pub unsafe fn hash_aes_1rx4(input: &[u8]) -> [u8; 64] {
    let all = keys();
    let init = &all.aes_hash_1r_state;
    let mut s = [
        load_key(&init[0]),
        load_key(&init[1]),
        load_key(&init[2]),
        load_key(&init[3]),
    ];

    for chunk in input.chunks_exact(64) {
        let m = load_lanes(chunk);
        s[0] = _mm_aesenc_si128(s[0], m[0]);
        s[1] = _mm_aesdec_si128(s[1], m[1]);
        s[2] = _mm_aesenc_si128(s[2], m[2]);
        s[3] = _mm_aesdec_si128(s[3], m[3]);
    }

    for xkey in &all.aes_hash_1r_xkeys {
        let x = load_key(xkey);
        s[0] = _mm_aesenc_si128(s[0], x);
        s[1] = _mm_aesdec_si128(s[1], x);
        s[2] = _mm_aesenc_si128(s[2], x);
        s[3] = _mm_aesdec_si128(s[3], x);
    }

    let mut out = [0u8; 64];
    store_lanes(&s, &mut out);
    out
}
