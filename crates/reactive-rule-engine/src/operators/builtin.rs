//! 默认操作符目录
//!
//! 按家族划分：基础比较、数值、日期、数组。
//! 数值与日期输入的解析较为宽容（接受数字字符串、RFC 3339、`YYYY-MM-DD`
//! 或 epoch 毫秒），解析失败统一判为 false，而不是抛错。

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use serde_json::Value;

use crate::facts::CURRENT_TIME_FACT;
use crate::operators::Operator;

// ---------------------------------------------------------------------------
// 输入辅助
// ---------------------------------------------------------------------------

/// 将 JSON 值解析为数值，数字字符串也接受
pub fn number_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// 数值输入校验
pub fn is_number(value: &Value) -> bool {
    number_value(value).is_some()
}

/// 解析 `[from, to]` 数值区间，要求 from <= to
pub fn number_range(value: &Value) -> Option<(f64, f64)> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    let from = number_value(&arr[0])?;
    let to = number_value(&arr[1])?;
    if from > to {
        return None;
    }
    Some((from, to))
}

/// 将 JSON 值解析为 UTC 时间
///
/// 支持 RFC 3339 字符串、`YYYY-MM-DD` 日期字符串（按当日零点）
/// 以及 epoch 毫秒数。
pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
            Some(date.and_hms_opt(0, 0, 0)?.and_utc())
        }
        Value::Number(n) => DateTime::from_timestamp_millis(n.as_i64()?),
        _ => None,
    }
}

/// 日期输入校验
pub fn is_date_input(value: &Value) -> bool {
    parse_date(value).is_some()
}

/// 解析 `[from, to]` 日期区间，要求 from <= to
pub fn date_range(value: &Value) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let arr = value.as_array()?;
    if arr.len() != 2 {
        return None;
    }
    let from = parse_date(&arr[0])?;
    let to = parse_date(&arr[1])?;
    if from > to {
        return None;
    }
    Some((from, to))
}

/// 解析正则模式
///
/// 支持裸模式（`test`）与带旗标形式（`/test/i`），旗标转换为内联分组。
pub fn parse_regexp(pattern: &str) -> Option<Regex> {
    if let Some(rest) = pattern.strip_prefix('/') {
        if let Some(idx) = rest.rfind('/') {
            let body = &rest[..idx];
            let flags: String = rest[idx + 1..]
                .chars()
                .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x' | 'U'))
                .collect();
            let pattern = if flags.is_empty() {
                body.to_string()
            } else {
                format!("(?{}){}", flags, body)
            };
            return Regex::new(&pattern).ok();
        }
    }
    Regex::new(pattern).ok()
}

/// 简单值校验：排除数组与对象
pub fn is_simple_value(value: &Value) -> bool {
    !value.is_array() && !value.is_object()
}

/// 宽松相等：数值统一转浮点比较（`100 == 100.0`、`"1" == 1`），其余按结构相等
fn loose_eq(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (number_value(a), number_value(b)) {
        return (x - y).abs() < f64::EPSILON;
    }
    a == b
}

// ---------------------------------------------------------------------------
// 基础操作符
// ---------------------------------------------------------------------------

pub fn equals() -> Operator {
    Operator::binary("equals", |lhs, rhs| loose_eq(lhs, rhs))
}

pub fn not_equals() -> Operator {
    Operator::binary("notEquals", |lhs, rhs| !loose_eq(lhs, rhs))
}

/// 事实存在且非 null 时为真（缺失事实在叶子层已判为 false）
pub fn is_defined() -> Operator {
    Operator::unary("isDefined", |lhs| !lhs.is_null())
}

pub fn is_undefined() -> Operator {
    Operator::unary("isUndefined", |lhs| lhs.is_null())
}

pub fn in_array() -> Operator {
    Operator::binary("inArray", |lhs, rhs| {
        rhs.as_array()
            .is_some_and(|arr| arr.iter().any(|v| loose_eq(lhs, v)))
    })
    .with_lhs_validator(is_simple_value)
}

pub fn not_in_array() -> Operator {
    Operator::binary("notInArray", |lhs, rhs| {
        rhs.as_array()
            .is_some_and(|arr| !arr.iter().any(|v| loose_eq(lhs, v)))
    })
    .with_lhs_validator(is_simple_value)
}

pub fn in_string() -> Operator {
    Operator::binary("inString", |lhs, rhs| {
        match (lhs.as_str(), rhs.as_str()) {
            (Some(needle), Some(haystack)) => haystack.contains(needle),
            _ => false,
        }
    })
    .with_lhs_validator(|lhs| lhs.is_string())
}

pub fn not_in_string() -> Operator {
    Operator::binary("notInString", |lhs, rhs| {
        match (lhs.as_str(), rhs.as_str()) {
            (Some(needle), Some(haystack)) => !haystack.contains(needle),
            _ => false,
        }
    })
    .with_lhs_validator(|lhs| lhs.is_string())
}

pub fn matches_pattern() -> Operator {
    Operator::binary("matchesPattern", |lhs, rhs| {
        let (Some(text), Some(pattern)) = (lhs.as_str(), rhs.as_str()) else {
            return false;
        };
        parse_regexp(pattern).is_some_and(|re| re.is_match(text))
    })
    .with_lhs_validator(|lhs| lhs.is_string())
}

// ---------------------------------------------------------------------------
// 数值操作符
// ---------------------------------------------------------------------------

fn number_op(name: &'static str, cmp: fn(f64, f64) -> bool) -> Operator {
    Operator::binary(name, move |lhs, rhs| {
        match (number_value(lhs), number_value(rhs)) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        }
    })
    .with_lhs_validator(is_number)
}

pub fn greater_than() -> Operator {
    number_op("greaterThan", |a, b| a > b)
}

pub fn greater_than_or_equals() -> Operator {
    number_op("greaterThanOrEquals", |a, b| a >= b)
}

pub fn less_than() -> Operator {
    number_op("lessThan", |a, b| a < b)
}

pub fn less_than_or_equals() -> Operator {
    number_op("lessThanOrEquals", |a, b| a <= b)
}

pub fn in_range_number() -> Operator {
    Operator::binary("inRangeNumber", |lhs, rhs| {
        match (number_value(lhs), number_range(rhs)) {
            (Some(v), Some((from, to))) => v >= from && v <= to,
            _ => false,
        }
    })
    .with_lhs_validator(is_number)
}

// ---------------------------------------------------------------------------
// 日期操作符
// ---------------------------------------------------------------------------

fn date_op(name: &'static str, cmp: fn(DateTime<Utc>, DateTime<Utc>) -> bool) -> Operator {
    Operator::binary(name, move |lhs, rhs| {
        match (parse_date(lhs), parse_date(rhs)) {
            (Some(a), Some(b)) => cmp(a, b),
            _ => false,
        }
    })
    .with_lhs_validator(is_date_input)
}

pub fn date_before() -> Operator {
    date_op("dateBefore", |a, b| a < b)
}

pub fn date_after() -> Operator {
    date_op("dateAfter", |a, b| a > b)
}

pub fn date_equals() -> Operator {
    date_op("dateEquals", |a, b| a == b)
}

pub fn in_range_date() -> Operator {
    Operator::binary("inRangeDate", |lhs, rhs| {
        match (parse_date(lhs), date_range(rhs)) {
            (Some(v), Some((from, to))) => v >= from && v <= to,
            _ => false,
        }
    })
    .with_lhs_validator(is_date_input)
}

/// 目标时刻落在 [当前时间, 当前时间 + N 分钟] 窗口内
///
/// 当前时间取自内置时钟事实，作为隐式依赖参与增量重算。
pub fn date_in_next_minutes() -> Operator {
    Operator::binary_with_facts(
        "dateInNextMinutes",
        &[CURRENT_TIME_FACT],
        |lhs, rhs, ctx| {
            let (Some(target), Some(minutes)) = (parse_date(lhs), number_value(rhs)) else {
                return false;
            };
            let Some(now) = ctx.fact(CURRENT_TIME_FACT).and_then(parse_date) else {
                return false;
            };
            let window_end = now + Duration::milliseconds((minutes * 60_000.0) as i64);
            target >= now && target <= window_end
        },
    )
    .with_lhs_validator(is_date_input)
}

/// 目标时刻晚于当前时间 + N 分钟窗口（过去的时刻判为 false，不是取反）
pub fn date_not_in_next_minutes() -> Operator {
    Operator::binary_with_facts(
        "dateNotInNextMinutes",
        &[CURRENT_TIME_FACT],
        |lhs, rhs, ctx| {
            let (Some(target), Some(minutes)) = (parse_date(lhs), number_value(rhs)) else {
                return false;
            };
            let Some(now) = ctx.fact(CURRENT_TIME_FACT).and_then(parse_date) else {
                return false;
            };
            let window_end = now + Duration::milliseconds((minutes * 60_000.0) as i64);
            target > window_end
        },
    )
    .with_lhs_validator(is_date_input)
}

// ---------------------------------------------------------------------------
// 数组操作符
// ---------------------------------------------------------------------------

pub fn array_contains() -> Operator {
    Operator::binary("arrayContains", |lhs, rhs| {
        lhs.as_array()
            .is_some_and(|arr| arr.iter().any(|v| loose_eq(v, rhs)))
    })
    .with_lhs_validator(|lhs| lhs.is_array())
}

pub fn not_array_contains() -> Operator {
    Operator::binary("notArrayContains", |lhs, rhs| {
        lhs.as_array()
            .is_some_and(|arr| !arr.iter().any(|v| loose_eq(v, rhs)))
    })
    .with_lhs_validator(|lhs| lhs.is_array())
}

pub fn one_in() -> Operator {
    Operator::binary("oneIn", |lhs, rhs| {
        match (lhs.as_array(), rhs.as_array()) {
            (Some(left), Some(right)) => left
                .iter()
                .any(|v| right.iter().any(|other| loose_eq(v, other))),
            _ => false,
        }
    })
    .with_lhs_validator(|lhs| lhs.is_array())
}

pub fn all_in() -> Operator {
    Operator::binary("allIn", |lhs, rhs| {
        match (lhs.as_array(), rhs.as_array()) {
            (Some(left), Some(right)) => left
                .iter()
                .all(|v| right.iter().any(|other| loose_eq(v, other))),
            _ => false,
        }
    })
    .with_lhs_validator(|lhs| lhs.is_array())
}

pub fn all_not_in() -> Operator {
    Operator::binary("allNotIn", |lhs, rhs| {
        match (lhs.as_array(), rhs.as_array()) {
            (Some(left), Some(right)) => !left
                .iter()
                .any(|v| right.iter().any(|other| loose_eq(v, other))),
            _ => false,
        }
    })
    .with_lhs_validator(|lhs| lhs.is_array())
}

pub fn length_equals() -> Operator {
    Operator::binary("lengthEquals", |lhs, rhs| {
        match (lhs.as_array(), number_value(rhs)) {
            (Some(arr), Some(len)) => arr.len() as f64 == len,
            _ => false,
        }
    })
    .with_lhs_validator(|lhs| lhs.is_array())
}

/// 默认操作符全集
pub fn default_operators() -> Vec<Operator> {
    vec![
        // 基础
        equals(),
        not_equals(),
        is_defined(),
        is_undefined(),
        in_array(),
        not_in_array(),
        in_string(),
        not_in_string(),
        matches_pattern(),
        // 数值
        greater_than(),
        greater_than_or_equals(),
        less_than(),
        less_than_or_equals(),
        in_range_number(),
        // 日期
        date_before(),
        date_after(),
        date_equals(),
        in_range_date(),
        date_in_next_minutes(),
        date_not_in_next_minutes(),
        // 数组
        array_contains(),
        not_array_contains(),
        one_in(),
        all_in(),
        all_not_in(),
        length_equals(),
    ]
}
