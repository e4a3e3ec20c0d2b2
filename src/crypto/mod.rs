//! Cryptographic utilities for permit issuers

pub mod eth;

pub use eth::{
    checksum_address, keccak256, keccak_words, parse_address, recover_signer, uint_word,
    IssuerKey, IssuerSignature,
};
