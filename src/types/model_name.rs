//! 模型名归一化
//!
//! Bedrock 等渠道返回的模型名带有区域前缀（`us.`）、厂商段（`anthropic.`）
//! 和版本后缀（`-v2:0`），统计前统一去掉，保证同一模型落在同一个桶里。

use std::sync::LazyLock;

use regex::Regex;

static REGION_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9-]+\.").unwrap_or_else(|_| unreachable!()));
static VERSION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-v\d+:\d+$").unwrap_or_else(|_| unreachable!()));
static GENERIC_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-v\d+:\d+$|:latest$").unwrap_or_else(|_| unreachable!()));

/// 未知模型的占位名
pub const UNKNOWN_MODEL: &str = "unknown";

/// 归一化模型名
#[must_use]
pub fn normalize_model_name(model: &str) -> String {
    let model = model.trim();
    if model.is_empty() || model == UNKNOWN_MODEL {
        return UNKNOWN_MODEL.to_string();
    }

    if model.contains(".anthropic.") || model.contains(".claude") {
        let stripped = REGION_PREFIX.replace(model, "");
        let stripped = stripped.replacen("anthropic.", "", 1);
        return VERSION_SUFFIX.replace(&stripped, "").into_owned();
    }

    GENERIC_SUFFIX.replace(model, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("us.anthropic.claude-3-5-sonnet-20241022-v2:0", "claude-3-5-sonnet-20241022")]
    #[case("anthropic.claude-3-haiku-20240307-v1:0", "claude-3-haiku-20240307")]
    #[case("eu.anthropic.claude-sonnet-4-20250514-v1:0", "claude-sonnet-4-20250514")]
    #[case("claude-sonnet-4-20250514", "claude-sonnet-4-20250514")]
    #[case("llama3:latest", "llama3")]
    #[case("gpt-4o", "gpt-4o")]
    #[case("", "unknown")]
    fn test_normalize_model_name(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_model_name(input), expected);
    }
}
