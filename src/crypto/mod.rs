// Crypto module - key material, addresses, signatures and sealed envelopes
// Every other module goes through here for hashing secrets, signing and encryption

mod address;
mod cipher;
mod id;
mod keypair;
mod signer;

pub use address::{Address, AddressError, ADDRESS_PREFIX, SYSTEM_SENDER};
pub use cipher::{Cipher, DecryptionError, EncryptionError, Envelope, SymmetricKey};
pub use id::new_id;
pub use keypair::{AgreementKey, Keypair, KeypairError, PublicKey, SecretMaterial};
pub use signer::{Signature, SignatureError, Signer, SIGNATURE_LENGTH};
