/// Cryptography for gfs-backup: AEAD token sealing, zeroizing secret
/// wrappers and the credential vault built on them.
pub mod aead;
pub mod sensitive;
pub mod vault;
