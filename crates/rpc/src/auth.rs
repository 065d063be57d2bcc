//! Login challenge parameters and password hashing.
//!
//! The first login call deliberately omits the password; the device
//! answers with a challenge naming a realm, a random nonce and an
//! encryption scheme. The second call carries the password hashed
//! according to that scheme.

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;

/// Client type announced in both login phases.
pub const CLIENT_TYPE: &str = "Dahua3.0-Web3.0";

/// Challenge returned by login phase 1.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoginChallenge {
    pub realm: String,
    pub random: String,
    #[serde(default)]
    pub encryption: String,
}

impl LoginChallenge {
    /// Hash the password for phase 2.
    ///
    /// - `Basic`: `base64(user:password)`
    /// - `Default`: `upper(hex(md5(user:random:upper(hex(md5(user:realm:password))))))`
    /// - anything else: the raw password
    pub fn hash_password(&self, username: &str, password: &str) -> String {
        match self.encryption.as_str() {
            "Basic" => general_purpose::STANDARD.encode(format!("{username}:{password}")),
            "Default" => {
                let inner = md5_upper_hex(&format!("{username}:{}:{password}", self.realm));
                md5_upper_hex(&format!("{username}:{}:{inner}", self.random))
            }
            _ => password.to_string(),
        }
    }

    /// Login type flag sent with phase 2.
    pub fn login_type(&self) -> &'static str {
        if self.encryption == "WatchNet" {
            "WatchNet"
        } else {
            "Direct"
        }
    }
}

fn md5_upper_hex(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes())).to_uppercase()
}
