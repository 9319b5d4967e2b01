//! # 凭据加密模块
//!
//! 上游账号凭据在落盘前使用 AES-256-GCM 加密。密文和随机数分别 Base64 编码，
//! 以 JSON 形式整体存储。解密失败不会中断记录读取，调用方得到 `None`。

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use rand::RngCore;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::{Digest, Sha256};

use crate::error::{Result, StoreError};
use crate::{
    lerror,
    logging::{LogComponent, LogStage},
};

/// 加密后的值
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    /// Base64编码的加密数据
    pub data: String,
    /// Base64编码的随机数
    pub nonce: String,
}

/// 凭据加密器
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretCipher(..)")
    }
}

impl SecretCipher {
    /// 使用 32 字节密钥创建加密器
    #[must_use]
    pub fn new(key: &[u8; 32]) -> Self {
        let key: [u8; 32] = *key;
        let key = key.into();
        let cipher = Aes256Gcm::new(&key);
        Self { cipher }
    }

    /// 从配置派生密钥：64 位十六进制直接解码，其他字符串取 SHA-256
    pub fn from_config_key(key_material: &str) -> Result<Self> {
        if key_material.is_empty() {
            return Err(StoreError::config("加密密钥不能为空"));
        }

        let mut key = [0u8; 32];
        if key_material.len() == 64 {
            if let Ok(bytes) = hex::decode(key_material) {
                key.copy_from_slice(&bytes);
                return Ok(Self::new(&key));
            }
        }

        let digest = Sha256::digest(key_material.as_bytes());
        key.copy_from_slice(&digest);
        Ok(Self::new(&key))
    }

    /// 加密字符串
    pub fn encrypt(&self, plaintext: &str) -> Result<SealedSecret> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| StoreError::internal(format!("AES-GCM encryption failed: {e}")))?;

        Ok(SealedSecret {
            data: general_purpose::STANDARD.encode(&ciphertext),
            nonce: general_purpose::STANDARD.encode(nonce),
        })
    }

    /// 解密字符串
    pub fn decrypt(&self, sealed: &SealedSecret) -> Result<String> {
        let ciphertext = general_purpose::STANDARD
            .decode(&sealed.data)
            .map_err(|e| StoreError::decryption_with_source("加密数据格式错误", e))?;

        let nonce_bytes: [u8; 12] = general_purpose::STANDARD
            .decode(&sealed.nonce)
            .map_err(|e| StoreError::decryption_with_source("加密随机数格式错误", e))?
            .try_into()
            .map_err(|_| StoreError::decryption("加密随机数长度错误"))?;
        let nonce = nonce_bytes.into();

        let plaintext = self
            .cipher
            .decrypt(&nonce, ciphertext.as_ref())
            .map_err(|e| StoreError::decryption(format!("AES-GCM decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| StoreError::decryption_with_source("解密后的数据不是有效的UTF-8字符串", e))
    }

    /// 序列化并加密，返回可直接落盘的 JSON 文本
    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let plaintext = serde_json::to_string(value)?;
        let sealed = self.encrypt(&plaintext)?;
        Ok(serde_json::to_string(&sealed)?)
    }

    /// 解密并反序列化。任何失败都记录日志并返回 `None`
    pub fn open_json<T: DeserializeOwned>(&self, sealed_json: &str, owner: &str) -> Option<T> {
        let opened = serde_json::from_str::<SealedSecret>(sealed_json)
            .map_err(StoreError::from)
            .and_then(|sealed| self.decrypt(&sealed))
            .and_then(|plaintext| serde_json::from_str::<T>(&plaintext).map_err(StoreError::from));

        match opened {
            Ok(value) => Some(value),
            Err(e) => {
                lerror!(
                    "system",
                    LogStage::Db,
                    LogComponent::Crypto,
                    "decrypt_failed",
                    &format!("凭据解密失败，按空凭据返回: {e}"),
                    owner = owner
                );
                None
            }
        }
    }

    /// 生成新的加密密钥
    #[must_use]
    pub fn generate_key() -> String {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        hex::encode(key)
    }
}
