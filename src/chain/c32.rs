//! Crockford base-32 check encoding used for Stacks addresses.

use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const C32_ALPHABET: &[u8; 32] = b"0123456789ABCDEFGHJKMNPQRSTVWXYZ";

pub const MAINNET_SINGLESIG: u8 = 22;
pub const TESTNET_SINGLESIG: u8 = 26;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum C32Error {
    #[error("invalid c32 character {0:?}")]
    InvalidCharacter(char),
    #[error("address must start with 'S'")]
    MissingPrefix,
    #[error("invalid address version {0}")]
    InvalidVersion(u8),
    #[error("address payload must be 24 bytes, got {0}")]
    InvalidLength(usize),
    #[error("address checksum mismatch")]
    BadChecksum,
}

fn c32_value(c: char) -> Result<u8, C32Error> {
    // Crockford aliases
    let normalized = match c.to_ascii_uppercase() {
        'O' => '0',
        'L' | 'I' => '1',
        other => other,
    };
    C32_ALPHABET
        .iter()
        .position(|&b| b as char == normalized)
        .map(|idx| idx as u8)
        .ok_or(C32Error::InvalidCharacter(c))
}

pub fn c32_encode(input: &[u8]) -> String {
    let mut result = Vec::with_capacity(input.len() * 8 / 5 + 1);
    let mut carry: u8 = 0;
    let mut carry_bits: u8 = 0;

    for byte in input.iter().rev() {
        let low_bits_to_take = 5 - carry_bits;
        let low_bits = byte & ((1u8 << low_bits_to_take) - 1);
        let value = (low_bits << carry_bits) + carry;
        result.push(C32_ALPHABET[value as usize]);
        carry_bits = (8 + carry_bits) - 5;
        carry = byte >> (8 - carry_bits);

        if carry_bits >= 5 {
            result.push(C32_ALPHABET[(carry & 0x1f) as usize]);
            carry_bits -= 5;
            carry >>= 5;
        }
    }

    if carry_bits > 0 {
        result.push(C32_ALPHABET[carry as usize]);
    }

    // strip leading zero digits, then restore one per leading zero byte
    while result.last() == Some(&C32_ALPHABET[0]) {
        result.pop();
    }
    for byte in input {
        if *byte != 0 {
            break;
        }
        result.push(C32_ALPHABET[0]);
    }

    result.reverse();
    result.into_iter().map(char::from).collect()
}

pub fn c32_decode(input: &str) -> Result<Vec<u8>, C32Error> {
    let digits = input
        .chars()
        .rev()
        .map(c32_value)
        .collect::<Result<Vec<u8>, _>>()?;

    let mut result = Vec::with_capacity(digits.len() * 5 / 8 + 1);
    let mut carry: u16 = 0;
    let mut carry_bits: u16 = 0;

    for digit in &digits {
        carry += u16::from(*digit) << carry_bits;
        carry_bits += 5;
        if carry_bits >= 8 {
            result.push((carry & 0xff) as u8);
            carry_bits -= 8;
            carry >>= 8;
        }
    }

    if carry_bits > 0 {
        result.push(carry as u8);
    }

    while result.last() == Some(&0) {
        result.pop();
    }
    for digit in digits.iter().rev() {
        if *digit != 0 {
            break;
        }
        result.push(0);
    }

    result.reverse();
    Ok(result)
}

fn checksum(version: u8, hash160: &[u8; 20]) -> [u8; 4] {
    let mut hasher = Sha256::new();
    hasher.update([version]);
    hasher.update(hash160);
    let second = Sha256::digest(hasher.finalize());
    let mut out = [0u8; 4];
    out.copy_from_slice(&second[..4]);
    out
}

/// Standard (single-signature) Stacks address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StacksAddress {
    pub version: u8,
    pub hash160: [u8; 20],
}

impl StacksAddress {
    pub fn new(version: u8, hash160: [u8; 20]) -> Result<Self, C32Error> {
        if version >= 32 {
            return Err(C32Error::InvalidVersion(version));
        }
        Ok(Self { version, hash160 })
    }
}

impl fmt::Display for StacksAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(&self.hash160);
        payload.extend_from_slice(&checksum(self.version, &self.hash160));
        write!(
            f,
            "S{}{}",
            C32_ALPHABET[self.version as usize] as char,
            c32_encode(&payload)
        )
    }
}

impl FromStr for StacksAddress {
    type Err = C32Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix('S').ok_or(C32Error::MissingPrefix)?;
        let mut chars = rest.chars();
        let version = c32_value(chars.next().ok_or(C32Error::MissingPrefix)?)?;
        let payload = c32_decode(chars.as_str())?;
        if payload.len() != 24 {
            return Err(C32Error::InvalidLength(payload.len()));
        }

        let mut hash160 = [0u8; 20];
        hash160.copy_from_slice(&payload[..20]);
        if payload[20..] != checksum(version, &hash160) {
            return Err(C32Error::BadChecksum);
        }
        Ok(Self { version, hash160 })
    }
}
