use thiserror::Error;

/// 存储边界上的宽松类型转换错误
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("无法将 `{value}` 转换为{target}")]
    Invalid { value: String, target: &'static str },

    #[error("JSON 转换失败: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConversionError {
    #[must_use]
    pub fn invalid(value: impl Into<String>, target: &'static str) -> Self {
        Self::Invalid {
            value: value.into(),
            target,
        }
    }
}
