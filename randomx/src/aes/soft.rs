//! Portable table-driven AES rounds.
//!
//! `aesenc`/`aesdec` match the x86 `AESENC`/`AESDEC` instructions: a single
//! full round with the round key XORed last. Columns are little-endian
//! `u32` words, row 0 in the low byte.

use crate::keys::AesKey;

// AES S-Box
#[rustfmt::skip]
const SBOX: [u8; 256] = [
    0x63, 0x7c, 0x77, 0x7b, 0xf2, 0x6b, 0x6f, 0xc5, 0x30, 0x01, 0x67, 0x2b, 0xfe, 0xd7, 0xab, 0x76,
    0xca, 0x82, 0xc9, 0x7d, 0xfa, 0x59, 0x47, 0xf0, 0xad, 0xd4, 0xa2, 0xaf, 0x9c, 0xa4, 0x72, 0xc0,
    0xb7, 0xfd, 0x93, 0x26, 0x36, 0x3f, 0xf7, 0xcc, 0x34, 0xa5, 0xe5, 0xf1, 0x71, 0xd8, 0x31, 0x15,
    0x04, 0xc7, 0x23, 0xc3, 0x18, 0x96, 0x05, 0x9a, 0x07, 0x12, 0x80, 0xe2, 0xeb, 0x27, 0xb2, 0x75,
    0x09, 0x83, 0x2c, 0x1a, 0x1b, 0x6e, 0x5a, 0xa0, 0x52, 0x3b, 0xd6, 0xb3, 0x29, 0xe3, 0x2f, 0x84,
    0x53, 0xd1, 0x00, 0xed, 0x20, 0xfc, 0xb1, 0x5b, 0x6a, 0xcb, 0xbe, 0x39, 0x4a, 0x4c, 0x58, 0xcf,
    0xd0, 0xef, 0xaa, 0xfb, 0x43, 0x4d, 0x33, 0x85, 0x45, 0xf9, 0x02, 0x7f, 0x50, 0x3c, 0x9f, 0xa8,
    0x51, 0xa3, 0x40, 0x8f, 0x92, 0x9d, 0x38, 0xf5, 0xbc, 0xb6, 0xda, 0x21, 0x10, 0xff, 0xf3, 0xd2,
    0xcd, 0x0c, 0x13, 0xec, 0x5f, 0x97, 0x44, 0x17, 0xc4, 0xa7, 0x7e, 0x3d, 0x64, 0x5d, 0x19, 0x73,
    0x60, 0x81, 0x4f, 0xdc, 0x22, 0x2a, 0x90, 0x88, 0x46, 0xee, 0xb8, 0x14, 0xde, 0x5e, 0x0b, 0xdb,
    0xe0, 0x32, 0x3a, 0x0a, 0x49, 0x06, 0x24, 0x5c, 0xc2, 0xd3, 0xac, 0x62, 0x91, 0x95, 0xe4, 0x79,
    0xe7, 0xc8, 0x37, 0x6d, 0x8d, 0xd5, 0x4e, 0xa9, 0x6c, 0x56, 0xf4, 0xea, 0x65, 0x7a, 0xae, 0x08,
    0xba, 0x78, 0x25, 0x2e, 0x1c, 0xa6, 0xb4, 0xc6, 0xe8, 0xdd, 0x74, 0x1f, 0x4b, 0xbd, 0x8b, 0x8a,
    0x70, 0x3e, 0xb5, 0x66, 0x48, 0x03, 0xf6, 0x0e, 0x61, 0x35, 0x57, 0xb9, 0x86, 0xc1, 0x1d, 0x9e,
    0xe1, 0xf8, 0x98, 0x11, 0x69, 0xd9, 0x8e, 0x94, 0x9b, 0x1e, 0x87, 0xe9, 0xce, 0x55, 0x28, 0xdf,
    0x8c, 0xa1, 0x89, 0x0d, 0xbf, 0xe6, 0x42, 0x68, 0x41, 0x99, 0x2d, 0x0f, 0xb0, 0x54, 0xbb, 0x16,
];

const INV_SBOX: [u8; 256] = invert(&SBOX);

/// Encryption T-tables: SubBytes and MixColumns for row `n` input bytes.
const TE: [[u32; 256]; 4] = rotations(&build_te());
/// Decryption T-tables: InvSubBytes and InvMixColumns for row `n` input bytes.
const TD: [[u32; 256]; 4] = rotations(&build_td());

/// GF(2^8) multiplication modulo x^8 + x^4 + x^3 + x + 1.
const fn gmul(mut a: u8, mut b: u8) -> u8 {
    let mut p = 0u8;
    while b != 0 {
        if b & 1 != 0 {
            p ^= a;
        }
        a = (a << 1) ^ ((a >> 7) * 0x1b);
        b >>= 1;
    }
    p
}

const fn invert(sbox: &[u8; 256]) -> [u8; 256] {
    let mut inv = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        inv[sbox[i] as usize] = i as u8;
        i += 1;
    }
    inv
}

const fn column(r0: u8, r1: u8, r2: u8, r3: u8) -> u32 {
    r0 as u32 | (r1 as u32) << 8 | (r2 as u32) << 16 | (r3 as u32) << 24
}

const fn build_te() -> [u32; 256] {
    let mut t = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let s = SBOX[i];
        t[i] = column(gmul(s, 2), s, s, gmul(s, 3));
        i += 1;
    }
    t
}

const fn build_td() -> [u32; 256] {
    let mut t = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let s = INV_SBOX[i];
        t[i] = column(gmul(s, 14), gmul(s, 9), gmul(s, 13), gmul(s, 11));
        i += 1;
    }
    t
}

const fn rotations(t0: &[u32; 256]) -> [[u32; 256]; 4] {
    let mut t = [[0u32; 256]; 4];
    let mut n = 0;
    while n < 4 {
        let mut i = 0;
        while i < 256 {
            t[n][i] = t0[i].rotate_left(8 * n as u32);
            i += 1;
        }
        n += 1;
    }
    t
}

#[inline(always)]
const fn byte(word: u32, row: u32) -> usize {
    ((word >> (8 * row)) & 0xFF) as usize
}

/// One AES encryption round (`AESENC`).
#[inline]
pub fn aesenc(state: &mut AesKey, key: &AesKey) {
    let s = *state;
    for c in 0..4 {
        state[c] = TE[0][byte(s[c], 0)]
            ^ TE[1][byte(s[(c + 1) % 4], 1)]
            ^ TE[2][byte(s[(c + 2) % 4], 2)]
            ^ TE[3][byte(s[(c + 3) % 4], 3)]
            ^ key[c];
    }
}

/// One AES decryption round (`AESDEC`).
#[inline]
pub fn aesdec(state: &mut AesKey, key: &AesKey) {
    let s = *state;
    for c in 0..4 {
        state[c] = TD[0][byte(s[c], 0)]
            ^ TD[1][byte(s[(c + 3) % 4], 1)]
            ^ TD[2][byte(s[(c + 2) % 4], 2)]
            ^ TD[3][byte(s[(c + 1) % 4], 3)]
            ^ key[c];
    }
}

/// Four lanes: decrypt, encrypt, decrypt, encrypt.
#[inline]
pub fn round_dec_enc(states: &mut [AesKey; 4], keys: [&AesKey; 4]) {
    aesdec(&mut states[0], keys[0]);
    aesenc(&mut states[1], keys[1]);
    aesdec(&mut states[2], keys[2]);
    aesenc(&mut states[3], keys[3]);
}

/// Four lanes: encrypt, decrypt, encrypt, decrypt.
#[inline]
pub fn round_enc_dec(states: &mut [AesKey; 4], keys: [&AesKey; 4]) {
    aesenc(&mut states[0], keys[0]);
    aesdec(&mut states[1], keys[1]);
    aesenc(&mut states[2], keys[2]);
    aesdec(&mut states[3], keys[3]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_u64s(lo: u64, hi: u64) -> AesKey {
        [lo as u32, (lo >> 32) as u32, hi as u32, (hi >> 32) as u32]
    }

    fn bytes(s: &AesKey) -> [u8; 16] {
        let mut b = [0u8; 16];
        for (c, w) in s.iter().enumerate() {
            b[c * 4..c * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        b
    }

    #[test]
    fn aesenc_known_answer() {
        let c0 = 0xB172_17F7_D1CF_79AB_u64;
        let seed = 0xDEAD_BEEF_u64;
        let mut state = from_u64s(c0, c0 + 1);
        aesenc(&mut state, &from_u64s(seed, seed));
        assert_eq!(state, from_u64s(0x321c_e16f_8973_6a62, 0x321c_e16f_8780_999f));
    }

    /// Byte-wise InvShiftRows, InvSubBytes, InvMixColumns, AddRoundKey.
    fn aesdec_reference(state: &AesKey, key: &AesKey) -> AesKey {
        let s = bytes(state);
        let k = bytes(key);
        let mut shifted = [0u8; 16];
        for c in 0..4 {
            for r in 0..4 {
                shifted[r + 4 * c] = INV_SBOX[s[r + 4 * ((c + 4 - r) % 4)] as usize];
            }
        }
        let mut out = [0u8; 16];
        for c in 0..4 {
            let a = &shifted[4 * c..4 * c + 4];
            out[4 * c] = gmul(a[0], 14) ^ gmul(a[1], 11) ^ gmul(a[2], 13) ^ gmul(a[3], 9);
            out[4 * c + 1] = gmul(a[0], 9) ^ gmul(a[1], 14) ^ gmul(a[2], 11) ^ gmul(a[3], 13);
            out[4 * c + 2] = gmul(a[0], 13) ^ gmul(a[1], 9) ^ gmul(a[2], 14) ^ gmul(a[3], 11);
            out[4 * c + 3] = gmul(a[0], 11) ^ gmul(a[1], 13) ^ gmul(a[2], 9) ^ gmul(a[3], 14);
        }
        core::array::from_fn(|c| {
            u32::from_le_bytes([
                out[4 * c] ^ k[4 * c],
                out[4 * c + 1] ^ k[4 * c + 1],
                out[4 * c + 2] ^ k[4 * c + 2],
                out[4 * c + 3] ^ k[4 * c + 3],
            ])
        })
    }

    #[test]
    fn aesdec_matches_bytewise_round() {
        let mut state = from_u64s(0x0123_4567_89AB_CDEF, 0xFEDC_BA98_7654_3210);
        let key = from_u64s(0x0F1E_2D3C_4B5A_6978, 0x8796_A5B4_C3D2_E1F0);
        for _ in 0..16 {
            let expected = aesdec_reference(&state, &key);
            aesdec(&mut state, &key);
            assert_eq!(state, expected);
        }
    }

    #[test]
    fn sbox_round_trips() {
        for i in 0..=255u8 {
            assert_eq!(INV_SBOX[SBOX[i as usize] as usize], i);
        }
    }
}
