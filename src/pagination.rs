use serde_json::{json, Value};

pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Normalized pagination parameters. Construction is pure and deterministic:
/// the same raw query values always produce the same `(page, page_size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageParams {
    pub page: i64,
    pub page_size: i64,
}

impl PageParams {
    /// Parse raw query values. Absent or non-numeric `page` falls back to 1;
    /// absent or non-numeric `page_size` falls back to the default, then both
    /// are clamped (`page >= 1`, `1 <= page_size <= 100`).
    pub fn from_raw(page: Option<&str>, page_size: Option<&str>) -> Self {
        let page = parse_positive(page).unwrap_or(1).max(1);
        let page_size = parse_positive(page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        Self { page, page_size }
    }

    pub fn skip(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    pub fn take(&self) -> i64 {
        self.page_size
    }
}

pub fn total_pages(total: i64, page_size: i64) -> i64 {
    if total <= 0 || page_size <= 0 {
        return 0;
    }
    (total + page_size - 1) / page_size
}

/// The `{data, meta}` response envelope every list endpoint returns.
pub fn envelope(data: Vec<Value>, total: i64, params: PageParams) -> Value {
    json!({
        "data": data,
        "meta": {
            "total": total,
            "page": params.page,
            "page_size": params.page_size,
            "total_pages": total_pages(total, params.page_size),
        }
    })
}

fn parse_positive(raw: Option<&str>) -> Option<i64> {
    let value = raw?.trim().parse::<i64>().ok()?;
    Some(value.max(0))
}

#[cfg(test)]
mod tests {
    use super::{envelope, total_pages, PageParams, DEFAULT_PAGE_SIZE};
    use serde_json::json;

    #[test]
    fn skip_and_take_follow_the_contract() {
        let params = PageParams::from_raw(Some("3"), Some("25"));
        assert_eq!(params.skip(), 50);
        assert_eq!(params.take(), 25);
    }

    #[test]
    fn page_size_is_clamped_into_range() {
        assert_eq!(PageParams::from_raw(None, Some("500")).page_size, 100);
        assert_eq!(PageParams::from_raw(None, Some("0")).page_size, 1);
        assert_eq!(PageParams::from_raw(None, Some("-5")).page_size, 1);
    }

    #[test]
    fn malformed_input_falls_back_to_defaults() {
        let params = PageParams::from_raw(Some("banana"), Some("many"));
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, DEFAULT_PAGE_SIZE);

        let params = PageParams::from_raw(None, None);
        assert_eq!(params.page, 1);
        assert_eq!(params.page_size, DEFAULT_PAGE_SIZE);

        assert_eq!(PageParams::from_raw(Some("0"), None).page, 1);
        assert_eq!(PageParams::from_raw(Some("-2"), None).page, 1);
    }

    #[test]
    fn parsing_is_deterministic() {
        let first = PageParams::from_raw(Some("7"), Some("42"));
        let second = PageParams::from_raw(Some("7"), Some("42"));
        assert_eq!(first, second);
    }

    #[test]
    fn total_pages_rounds_up() {
        assert_eq!(total_pages(0, 20), 0);
        assert_eq!(total_pages(1, 20), 1);
        assert_eq!(total_pages(20, 20), 1);
        assert_eq!(total_pages(21, 20), 2);
        assert_eq!(total_pages(101, 100), 2);
    }

    #[test]
    fn envelope_carries_data_and_meta() {
        let params = PageParams::from_raw(Some("2"), Some("10"));
        let body = envelope(vec![json!({"id": 1})], 35, params);
        assert_eq!(body["meta"]["total"], 35);
        assert_eq!(body["meta"]["page"], 2);
        assert_eq!(body["meta"]["page_size"], 10);
        assert_eq!(body["meta"]["total_pages"], 4);
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    }
}
