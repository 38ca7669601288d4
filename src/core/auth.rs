// 刷新接口鉴权：从 `?secret=` 或 `x-refresh-secret` 请求头取出密钥并比对。
use axum::http::HeaderMap;

pub const REFRESH_SECRET_HEADER: &str = "x-refresh-secret";

pub fn extract_refresh_secret(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
    // 查询参数优先，其次请求头；取值原样返回，不做裁剪。
    let from_query = query.and_then(|query| {
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, value)| key == "secret" && !value.is_empty())
            .map(|(_, value)| value.into_owned())
    });
    from_query.or_else(|| {
        headers
            .get(REFRESH_SECRET_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    })
}

/// 逐字节比较，耗时与首个差异位置无关。
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    if provided.len() != expected.len() {
        return false;
    }
    provided
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (left, right)| acc | (left ^ right))
        == 0
}
