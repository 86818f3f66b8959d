//! Minimal Stacks transaction encoding: single-sig, standard auth, contract
//! call payload with `uint` and standard principal arguments.

use k256::ecdsa::SigningKey;
use sha2::{Digest, Sha512_256};
use thiserror::Error;

use crate::chain::c32::{StacksAddress, MAINNET_SINGLESIG, TESTNET_SINGLESIG};

const AUTH_STANDARD: u8 = 0x04;
const HASH_MODE_P2PKH: u8 = 0x00;
const KEY_ENCODING_COMPRESSED: u8 = 0x00;
const ANCHOR_MODE_ANY: u8 = 0x03;
const PAYLOAD_CONTRACT_CALL: u8 = 0x02;

const CLARITY_UINT: u8 = 0x01;
const CLARITY_STANDARD_PRINCIPAL: u8 = 0x05;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TxEncodeError {
    #[error("clarity name {0:?} must be 1..=128 bytes")]
    InvalidName(String),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
    #[error("signing failed: {0}")]
    Signing(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StacksNetwork {
    Mainnet,
    Testnet,
}

impl StacksNetwork {
    pub fn transaction_version(&self) -> u8 {
        match self {
            StacksNetwork::Mainnet => 0x00,
            StacksNetwork::Testnet => 0x80,
        }
    }

    pub fn chain_id(&self) -> u32 {
        match self {
            StacksNetwork::Mainnet => 0x0000_0001,
            StacksNetwork::Testnet => 0x8000_0000,
        }
    }

    pub fn address_version(&self) -> u8 {
        match self {
            StacksNetwork::Mainnet => MAINNET_SINGLESIG,
            StacksNetwork::Testnet => TESTNET_SINGLESIG,
        }
    }
}

impl std::str::FromStr for StacksNetwork {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(StacksNetwork::Mainnet),
            "testnet" | "devnet" | "mocknet" => Ok(StacksNetwork::Testnet),
            other => Err(format!("unknown stacks network {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostConditionMode {
    Allow = 0x01,
    Deny = 0x02,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarityValue {
    UInt(u128),
    Principal(StacksAddress),
}

impl ClarityValue {
    fn write(&self, out: &mut Vec<u8>) {
        match self {
            ClarityValue::UInt(v) => {
                out.push(CLARITY_UINT);
                out.extend_from_slice(&v.to_be_bytes());
            }
            ClarityValue::Principal(address) => {
                out.push(CLARITY_STANDARD_PRINCIPAL);
                out.push(address.version);
                out.extend_from_slice(&address.hash160);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
    pub contract_address: StacksAddress,
    pub contract_name: String,
    pub function_name: String,
    pub args: Vec<ClarityValue>,
}

/// Contract call ready to be signed by `sender`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedContractCall {
    pub network: StacksNetwork,
    pub sender: StacksAddress,
    pub nonce: u64,
    pub fee: u64,
    pub post_condition_mode: PostConditionMode,
    pub call: ContractCall,
}

fn write_name(out: &mut Vec<u8>, name: &str) -> Result<(), TxEncodeError> {
    if name.is_empty() || name.len() > 128 {
        return Err(TxEncodeError::InvalidName(name.to_string()));
    }
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

fn sha512_256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha512_256::digest(data));
    out
}

impl UnsignedContractCall {
    fn encode(&self, nonce: u64, fee: u64, signature: &[u8; 65]) -> Result<Vec<u8>, TxEncodeError> {
        let mut out = Vec::with_capacity(256);
        out.push(self.network.transaction_version());
        out.extend_from_slice(&self.network.chain_id().to_be_bytes());

        out.push(AUTH_STANDARD);
        out.push(HASH_MODE_P2PKH);
        out.extend_from_slice(&self.sender.hash160);
        out.extend_from_slice(&nonce.to_be_bytes());
        out.extend_from_slice(&fee.to_be_bytes());
        out.push(KEY_ENCODING_COMPRESSED);
        out.extend_from_slice(signature);

        out.push(ANCHOR_MODE_ANY);
        out.push(self.post_condition_mode as u8);
        out.extend_from_slice(&0u32.to_be_bytes()); // no post conditions

        out.push(PAYLOAD_CONTRACT_CALL);
        out.push(self.call.contract_address.version);
        out.extend_from_slice(&self.call.contract_address.hash160);
        write_name(&mut out, &self.call.contract_name)?;
        write_name(&mut out, &self.call.function_name)?;
        out.extend_from_slice(&(self.call.args.len() as u32).to_be_bytes());
        for arg in &self.call.args {
            arg.write(&mut out);
        }
        Ok(out)
    }

    /// Hash the signer commits to: the transaction with a cleared spending
    /// condition, extended with auth type, fee and nonce.
    pub fn presign_hash(&self) -> Result<[u8; 32], TxEncodeError> {
        let initial = sha512_256(&self.encode(0, 0, &[0u8; 65])?);
        let mut presign = Vec::with_capacity(32 + 1 + 16);
        presign.extend_from_slice(&initial);
        presign.push(AUTH_STANDARD);
        presign.extend_from_slice(&self.fee.to_be_bytes());
        presign.extend_from_slice(&self.nonce.to_be_bytes());
        Ok(sha512_256(&presign))
    }

    /// Signs and serializes. The result is what `/v2/transactions` accepts.
    pub fn sign(&self, key: &SigningKey) -> Result<SignedTransaction, TxEncodeError> {
        let presign = self.presign_hash()?;
        let (signature, recovery_id) = key
            .sign_prehash_recoverable(&presign)
            .map_err(|e| TxEncodeError::Signing(e.to_string()))?;

        // recoverable signature in VRS order
        let mut vrs = [0u8; 65];
        vrs[0] = recovery_id.to_byte();
        vrs[1..].copy_from_slice(&signature.to_bytes());

        let bytes = self.encode(self.nonce, self.fee, &vrs)?;
        Ok(SignedTransaction {
            txid: hex::encode(sha512_256(&bytes)),
            bytes,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub txid: String,
    pub bytes: Vec<u8>,
}

/// Parses a hex private key. A trailing `01` byte marks a compressed key.
pub fn parse_private_key(hex_key: &str) -> Result<SigningKey, TxEncodeError> {
    let raw = hex::decode(hex_key.trim_start_matches("0x"))
        .map_err(|e| TxEncodeError::InvalidKey(e.to_string()))?;
    let secret = match raw.len() {
        32 => &raw[..],
        33 if raw[32] == 0x01 => &raw[..32],
        n => return Err(TxEncodeError::InvalidKey(format!("unexpected key length {n}"))),
    };
    SigningKey::from_slice(secret).map_err(|e| TxEncodeError::InvalidKey(e.to_string()))
}
