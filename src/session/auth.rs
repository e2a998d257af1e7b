//! Login digest
//!
//! The server opens every connection with a challenge. Older servers send a
//! timestamp; newer ones send `realm:nonce`. The client answers with its user
//! name and `md5(md5(secret) + nonce)` in lowercase hex, where the secret is
//! the password for timestamps and `user:realm:password` for realm challenges.

/// Hex MD5 of a string
pub fn md5_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// Compute the login digest for a server challenge
pub fn digest(username: &str, password: &str, challenge: &str) -> String {
    let (inner, nonce) = match challenge.split_once(':') {
        Some((realm, nonce)) => (md5_hex(&format!("{}:{}:{}", username, realm, password)), nonce),
        None => (md5_hex(password), challenge),
    };
    md5_hex(&format!("{}{}", inner, nonce))
}
