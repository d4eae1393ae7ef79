use crate::error::AppError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// 日期版式中各捕获组的含义
#[derive(Debug, Clone, Copy)]
enum Layout {
    /// MM/YYYY, MM.YYYY (日默认为 1)
    MonthYear,
    /// DD/MM/YYYY, DD.MM.YYYY, DD-MM-YYYY
    DayMonthYear,
    /// YYYY-MM-DD, YYYY.MM.DD
    YearMonthDay,
}

/// 按优先级排列; 第一个语法匹配的版式即为结果, 不回退到后续版式
fn layouts() -> &'static [(Regex, Layout)] {
    static LAYOUTS: OnceLock<Vec<(Regex, Layout)>> = OnceLock::new();
    LAYOUTS.get_or_init(|| {
        [
            (r"^(\d{1,2})/(\d{4})$", Layout::MonthYear),
            (r"^(\d{1,2})\.(\d{4})$", Layout::MonthYear),
            (r"^(\d{1,2})/(\d{1,2})/(\d{4})$", Layout::DayMonthYear),
            (r"^(\d{1,2})\.(\d{1,2})\.(\d{4})$", Layout::DayMonthYear),
            (r"^(\d{4})-(\d{1,2})-(\d{1,2})$", Layout::YearMonthDay),
            (r"^(\d{4})\.(\d{1,2})\.(\d{1,2})$", Layout::YearMonthDay),
            (r"^(\d{1,2})-(\d{1,2})-(\d{4})$", Layout::DayMonthYear),
        ]
        .into_iter()
        .filter_map(|(pattern, layout)| Regex::new(pattern).ok().map(|re| (re, layout)))
        .collect()
    })
}

/// 解析到期日文本, 结果统一为 UTC 零点
///
/// 数值范围交给日历构造校验 (如 13 月直接失败), 不做截断修正。
/// 账本判定"同一批次"也以本函数的结果为准。
pub fn parse_expiration_date(text: &str) -> Result<DateTime<Utc>, AppError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(AppError::MalformedDate("empty date".to_string()));
    }

    for (re, layout) in layouts() {
        let Some(caps) = re.captures(text) else {
            continue;
        };
        let field = |i: usize| caps.get(i).map(|m| m.as_str()).unwrap_or_default();

        let (year, month, day) = match layout {
            Layout::MonthYear => (field(2), field(1), "1"),
            Layout::DayMonthYear => (field(3), field(2), field(1)),
            Layout::YearMonthDay => (field(1), field(2), field(3)),
        };
        return midnight_utc(text, year, month, day);
    }

    parse_iso_instant(text)
        .map(|instant| truncate_to_midnight(instant.date_naive()))
        .ok_or_else(|| AppError::MalformedDate(format!("unrecognized date: {}", text)))
}

fn midnight_utc(text: &str, year: &str, month: &str, day: &str) -> Result<DateTime<Utc>, AppError> {
    let malformed = || AppError::MalformedDate(format!("invalid calendar date: {}", text));

    let year: i32 = year.parse().map_err(|_| malformed())?;
    let month: u32 = month.parse().map_err(|_| malformed())?;
    let day: u32 = day.parse().map_err(|_| malformed())?;

    NaiveDate::from_ymd_opt(year, month, day)
        .map(truncate_to_midnight)
        .ok_or_else(malformed)
}

fn truncate_to_midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// 通用 ISO-8601 兜底: 带时区 (含 Z) 的时间点, 或不带时区的本地时间 (按 UTC)
fn parse_iso_instant(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(text) {
        return Some(instant.with_timezone(&Utc));
    }
    if let Ok(instant) = DateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f%:z") {
        return Some(instant.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
