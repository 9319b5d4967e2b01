//! 键值存储中的记录编码
//!
//! 账号凭据不以明文进入临时存储：记录本体照常序列化，凭据单独加密后
//! 放进 `credentials_sealed` 字段。

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::config::SecretCipher;
use crate::error::Result;
use crate::types::{ProviderAccountRecord, ProviderCredentials};

#[derive(Serialize)]
struct SealedAccountRef<'a> {
    #[serde(flatten)]
    record: &'a ProviderAccountRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    credentials_sealed: Option<String>,
}

#[derive(Deserialize)]
struct SealedAccount {
    #[serde(flatten)]
    record: ProviderAccountRecord,
    #[serde(default)]
    credentials_sealed: Option<String>,
}

/// 要落盘的凭据密文；没有明文凭据时沿用解不开的旧密文
pub(crate) fn seal_credentials(
    cipher: &SecretCipher,
    record: &ProviderAccountRecord,
) -> Result<Option<String>> {
    match &record.credentials {
        Some(credentials) => cipher.seal_json(credentials).map(Some),
        None => Ok(record.sealed_credentials.clone()),
    }
}

/// 解开凭据密文；失败时凭据为空，密文留在记录上
pub(crate) fn open_credentials(
    cipher: &SecretCipher,
    record: &mut ProviderAccountRecord,
    sealed: Option<String>,
) {
    let Some(sealed) = sealed.filter(|s| !s.is_empty()) else {
        return;
    };
    record.credentials = cipher.open_json::<ProviderCredentials>(&sealed, &record.id);
    if record.credentials.is_none() {
        record.sealed_credentials = Some(sealed);
    }
}

pub(crate) fn encode_account(cipher: &SecretCipher, record: &ProviderAccountRecord) -> Result<String> {
    let credentials_sealed = seal_credentials(cipher, record)?;
    Ok(serde_json::to_string(&SealedAccountRef {
        record,
        credentials_sealed,
    })?)
}

/// 凭据无法解密时记录保留、`credentials` 为 `None`
pub(crate) fn decode_account(cipher: &SecretCipher, raw: &str) -> Result<ProviderAccountRecord> {
    let SealedAccount {
        mut record,
        credentials_sealed,
    } = serde_json::from_str(raw)?;
    open_credentials(cipher, &mut record, credentials_sealed);
    Ok(record)
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(raw: &str) -> Result<T> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::helpers::{sample_account, test_cipher};

    #[test]
    fn test_account_credentials_are_sealed() {
        let cipher = test_cipher();
        let account = sample_account("acc-1");
        let raw = encode_account(&cipher, &account).unwrap();

        assert!(raw.contains("credentials_sealed"));
        assert!(!raw.contains("sk-test-secret"));

        let decoded = decode_account(&cipher, &raw).unwrap();
        assert_eq!(decoded, account);
    }

    #[test]
    fn test_wrong_key_drops_credentials() {
        let account = sample_account("acc-1");
        let raw = encode_account(&test_cipher(), &account).unwrap();

        let other = SecretCipher::from_config_key(&SecretCipher::generate_key()).unwrap();
        let decoded = decode_account(&other, &raw).unwrap();
        assert!(decoded.credentials.is_none());
        assert_eq!(decoded.name, account.name);
    }

    #[test]
    fn test_undecryptable_credentials_survive_reencode() {
        let account = sample_account("acc-1");
        let raw = encode_account(&test_cipher(), &account).unwrap();

        let other = SecretCipher::from_config_key(&SecretCipher::generate_key()).unwrap();
        let mut edited = decode_account(&other, &raw).unwrap();
        edited.priority += 1;
        let rewritten = encode_account(&other, &edited).unwrap();

        let restored = decode_account(&test_cipher(), &rewritten).unwrap();
        assert_eq!(restored.credentials, account.credentials);
        assert_eq!(restored.priority, account.priority + 1);
        assert!(restored.sealed_credentials.is_none());
    }
}
