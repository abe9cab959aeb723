use base64ct::Encoding;
use sha2::{Digest, Sha256};

/// Computes the `authentication` string of an `Identify` message from the
/// `challenge` and `salt` the server sent in its `Hello`.
///
/// `base64(sha256(base64(sha256(password + salt)) + challenge))`
pub fn derive_auth_response(password: &str, challenge: &str, salt: &str) -> String {
    let secret = Sha256::new()
        .chain_update(password)
        .chain_update(salt)
        .finalize();
    let secret = base64ct::Base64::encode_string(&secret);
    let response = Sha256::new()
        .chain_update(secret)
        .chain_update(challenge)
        .finalize();
    base64ct::Base64::encode_string(&response)
}
