use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use alloy::hex;
use anyhow::{Context, Result, anyhow, bail};
use scrypt::Params;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Fixed salt for the legacy `iv:ciphertext` blob format.
const LEGACY_SALT: &[u8] = b"kios-hotwallet-key-salt";

fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32]> {
    // Memory-hard KDF: scrypt N=2^14, r=8, p=1.
    let params = Params::new(14, 8, 1, 32).map_err(|e| anyhow!("scrypt params: {e}"))?;
    let mut key = [0u8; 32];
    scrypt::scrypt(password.as_bytes(), salt, &params, &mut key)
        .map_err(|e| anyhow!("scrypt: {e}"))?;
    Ok(key)
}

/// Decrypt a signing-key blob.
///
/// Format is `salt:iv:ciphertext` (hex fields), or legacy `iv:ciphertext`
/// with a fixed salt. The decrypted content is either a raw hex private
/// key or `ENV:<NAME>`, resolving the key from the process environment.
pub fn decrypt_key_blob(blob: &str, password: &str) -> Result<String> {
    let parts: Vec<&str> = blob.split(':').collect();
    let (salt, iv, ciphertext) = match parts.as_slice() {
        [salt, iv, ct] => (
            hex::decode(salt).context("decoding salt")?,
            hex::decode(iv).context("decoding iv")?,
            hex::decode(ct).context("decoding ciphertext")?,
        ),
        [iv, ct] => (
            LEGACY_SALT.to_vec(),
            hex::decode(iv).context("decoding iv")?,
            hex::decode(ct).context("decoding ciphertext")?,
        ),
        _ => bail!("key blob must be salt:iv:ciphertext or iv:ciphertext"),
    };

    let key = derive_key(password, &salt)?;
    let cipher = Aes256CbcDec::new_from_slices(&key, &iv)
        .map_err(|e| anyhow!("cipher init: {e}"))?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| anyhow!("key decryption failed (wrong password?)"))?;
    let content = String::from_utf8(plaintext).context("decrypted key is not utf8")?;
    let content = content.trim().to_string();

    if let Some(name) = content.strip_prefix("ENV:") {
        return std::env::var(name).with_context(|| format!("resolving key from env {name}"));
    }
    Ok(content)
}

/// Encrypt a key (or an `ENV:<NAME>` indirection) into the current blob
/// format with random salt and iv.
pub fn encrypt_key_blob(content: &str, password: &str) -> Result<String> {
    use rand::Rng;
    let salt: [u8; 16] = rand::rng().random();
    let iv: [u8; 16] = rand::rng().random();

    let key = derive_key(password, &salt)?;
    let cipher = Aes256CbcEnc::new_from_slices(&key, &iv)
        .map_err(|e| anyhow!("cipher init: {e}"))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(content.as_bytes());

    Ok(format!(
        "{}:{}:{}",
        hex::encode(salt),
        hex::encode(iv),
        hex::encode(ciphertext)
    ))
}
