//! Per-dialect rule tables.
//!
//! Operand 0 is the instance for member/method rules; static calls pass only
//! their arguments. Emitters receive operands already rendered to SQL.

use super::Dialect;
use super::format::{FormatTarget, translate_format};
use super::translate::{EmitFn, Operand, ResultType, Rule, TypeTag};
use crate::error::{OrmError, OrmResult};
use crate::value::{Value, ValueType};
use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, TimeDelta, Timelike};

pub(super) fn build(dialect: Dialect, tag: TypeTag, name: &str) -> Option<Rule> {
    match tag {
        TypeTag::DateTime | TypeTag::Date => datetime(dialect, tag, name),
        TypeTag::Duration => duration(dialect, name),
        TypeTag::String => string(dialect, name),
        TypeTag::Math => math(dialect, name),
        TypeTag::Uuid => uuid(dialect, name),
        TypeTag::Collection => collection(dialect, name),
    }
}

fn emit(f: impl Fn(&[Operand<'_>]) -> OrmResult<String> + Send + Sync + 'static) -> EmitFn {
    Box::new(f)
}

fn fixed(vt: ValueType) -> ResultType {
    ResultType::Fixed(vt)
}

fn arg<'a>(ops: &'a [Operand<'a>], i: usize) -> OrmResult<&'a Operand<'a>> {
    ops.get(i)
        .ok_or_else(|| OrmError::unsupported(format!("missing operand #{i}")))
}

/// A constant string inlined into the SQL text as a literal.
fn constant_text<'a>(op: &'a Operand<'a>, what: &str) -> OrmResult<&'a str> {
    let text = op
        .constant
        .and_then(Value::as_str)
        .ok_or_else(|| OrmError::unsupported(format!("{what} must be a constant string")))?;
    if text.chars().any(char::is_control) {
        return Err(OrmError::validation(format!(
            "{what} must not contain control characters"
        )));
    }
    Ok(text)
}

fn sql_string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn eval_err(name: &str) -> OrmError {
    OrmError::conversion(format!("cannot evaluate {name} on the given operands"))
}

fn datetime_of(values: &[Value], i: usize) -> OrmResult<NaiveDateTime> {
    values
        .get(i)
        .and_then(Value::as_datetime)
        .ok_or_else(|| eval_err("date/time member"))
}

fn number_of(values: &[Value], i: usize) -> OrmResult<f64> {
    values
        .get(i)
        .and_then(Value::as_f64)
        .ok_or_else(|| eval_err("numeric operation"))
}

fn text_of(values: &[Value], i: usize) -> OrmResult<&str> {
    values
        .get(i)
        .and_then(Value::as_str)
        .ok_or_else(|| eval_err("string operation"))
}

/// Rebuild a value of the same variant as `like` from a shifted instant.
fn same_kind(like: &Value, dt: NaiveDateTime) -> Value {
    match like {
        Value::Date(_) => Value::Date(dt.date()),
        Value::DateTimeUtc(_) => Value::DateTimeUtc(dt.and_utc()),
        _ => Value::DateTime(dt),
    }
}

fn shift(values: &[Value], f: impl Fn(NaiveDateTime, f64) -> Option<NaiveDateTime>) -> OrmResult<Value> {
    let dt = datetime_of(values, 0)?;
    let n = number_of(values, 1)?;
    let shifted = f(dt, n).ok_or_else(|| eval_err("date arithmetic (out of range)"))?;
    Ok(same_kind(&values[0], shifted))
}

fn delta_seconds(secs: f64) -> Option<TimeDelta> {
    TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)
}

fn add_months(dt: NaiveDateTime, months: i64) -> Option<NaiveDateTime> {
    let m = Months::new(u32::try_from(months.unsigned_abs()).ok()?);
    if months >= 0 {
        dt.checked_add_months(m)
    } else {
        dt.checked_sub_months(m)
    }
}

// ==================== Date / time ====================

#[derive(Clone, Copy)]
enum Part {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    Millisecond,
    DayOfWeek,
    DayOfYear,
}

fn part_sql(dialect: Dialect, part: Part, x: &str) -> String {
    use Part::*;
    match dialect {
        Dialect::Postgres => match part {
            Second => format!("CAST(FLOOR(EXTRACT(SECOND FROM {x})) AS INTEGER)"),
            Millisecond => format!("(CAST(EXTRACT(MILLISECONDS FROM {x}) AS INTEGER) % 1000)"),
            _ => {
                let field = match part {
                    Year => "YEAR",
                    Month => "MONTH",
                    Day => "DAY",
                    Hour => "HOUR",
                    Minute => "MINUTE",
                    DayOfWeek => "DOW",
                    _ => "DOY",
                };
                format!("CAST(EXTRACT({field} FROM {x}) AS INTEGER)")
            }
        },
        Dialect::MySql => match part {
            Year => format!("YEAR({x})"),
            Month => format!("MONTH({x})"),
            Day => format!("DAY({x})"),
            Hour => format!("HOUR({x})"),
            Minute => format!("MINUTE({x})"),
            Second => format!("SECOND({x})"),
            Millisecond => format!("FLOOR(MICROSECOND({x}) / 1000)"),
            DayOfWeek => format!("(DAYOFWEEK({x}) - 1)"),
            DayOfYear => format!("DAYOFYEAR({x})"),
        },
        Dialect::Sqlite => match part {
            Millisecond => format!("(CAST(strftime('%f', {x}) * 1000 AS INTEGER) % 1000)"),
            _ => {
                let code = match part {
                    Year => "%Y",
                    Month => "%m",
                    Day => "%d",
                    Hour => "%H",
                    Minute => "%M",
                    Second => "%S",
                    DayOfWeek => "%w",
                    _ => "%j",
                };
                format!("CAST(strftime('{code}', {x}) AS INTEGER)")
            }
        },
        Dialect::SqlServer => match part {
            DayOfWeek => format!("(DATEPART(weekday, {x}) - 1)"),
            _ => {
                let field = match part {
                    Year => "year",
                    Month => "month",
                    Day => "day",
                    Hour => "hour",
                    Minute => "minute",
                    Second => "second",
                    Millisecond => "millisecond",
                    _ => "dayofyear",
                };
                format!("DATEPART({field}, {x})")
            }
        },
    }
}

fn part_eval(part: Part) -> fn(&[Value]) -> OrmResult<Value> {
    fn get(values: &[Value], f: fn(NaiveDateTime) -> u32) -> OrmResult<Value> {
        let dt = datetime_of(values, 0)?;
        Ok(Value::I32(f(dt) as i32))
    }
    match part {
        Part::Year => |v| Ok(Value::I32(datetime_of(v, 0)?.year())),
        Part::Month => |v| get(v, |d| d.month()),
        Part::Day => |v| get(v, |d| d.day()),
        Part::Hour => |v| get(v, |d| d.hour()),
        Part::Minute => |v| get(v, |d| d.minute()),
        Part::Second => |v| get(v, |d| d.second()),
        Part::Millisecond => |v| get(v, |d| d.nanosecond() / 1_000_000 % 1000),
        Part::DayOfWeek => |v| get(v, |d| d.weekday().num_days_from_sunday()),
        Part::DayOfYear => |v| get(v, |d| d.ordinal()),
    }
}

#[derive(Clone, Copy)]
enum Unit {
    Days,
    Hours,
    Minutes,
    Seconds,
    Months,
    Years,
}

fn add_unit_sql(dialect: Dialect, unit: Unit, x: &str, n: &str) -> String {
    match dialect {
        Dialect::Postgres => match unit {
            Unit::Months | Unit::Years => {
                let u = if matches!(unit, Unit::Months) { "month" } else { "year" };
                format!("({x} + CAST({n} AS INTEGER) * INTERVAL '1 {u}')")
            }
            _ => {
                let u = match unit {
                    Unit::Days => "day",
                    Unit::Hours => "hour",
                    Unit::Minutes => "minute",
                    _ => "second",
                };
                format!("({x} + CAST({n} AS DOUBLE PRECISION) * INTERVAL '1 {u}')")
            }
        },
        Dialect::MySql => {
            let u = match unit {
                Unit::Days => "DAY",
                Unit::Hours => "HOUR",
                Unit::Minutes => "MINUTE",
                Unit::Seconds => "SECOND",
                Unit::Months => "MONTH",
                Unit::Years => "YEAR",
            };
            format!("DATE_ADD({x}, INTERVAL {n} {u})")
        }
        Dialect::Sqlite => {
            let (fmt, u) = match unit {
                Unit::Days => ("%+f", "days"),
                Unit::Hours => ("%+f", "hours"),
                Unit::Minutes => ("%+f", "minutes"),
                Unit::Seconds => ("%+f", "seconds"),
                Unit::Months => ("%+d", "months"),
                Unit::Years => ("%+d", "years"),
            };
            format!("datetime({x}, printf('{fmt} {u}', {n}))")
        }
        Dialect::SqlServer => {
            let u = match unit {
                Unit::Days => "day",
                Unit::Hours => "hour",
                Unit::Minutes => "minute",
                Unit::Seconds => "second",
                Unit::Months => "month",
                Unit::Years => "year",
            };
            format!("DATEADD({u}, {n}, {x})")
        }
    }
}

fn add_unit_eval(unit: Unit) -> fn(&[Value]) -> OrmResult<Value> {
    match unit {
        Unit::Days => |v| shift(v, |d, n| d.checked_add_signed(delta_seconds(n * 86_400.0)?)),
        Unit::Hours => |v| shift(v, |d, n| d.checked_add_signed(delta_seconds(n * 3_600.0)?)),
        Unit::Minutes => |v| shift(v, |d, n| d.checked_add_signed(delta_seconds(n * 60.0)?)),
        Unit::Seconds => |v| shift(v, |d, n| d.checked_add_signed(delta_seconds(n)?)),
        Unit::Months => |v| shift(v, |d, n| add_months(d, n as i64)),
        Unit::Years => |v| shift(v, |d, n| add_months(d, (n as i64).checked_mul(12)?)),
    }
}

fn datetime(dialect: Dialect, tag: TypeTag, name: &str) -> Option<Rule> {
    let part = match name {
        "year" => Some(Part::Year),
        "month" => Some(Part::Month),
        "day" => Some(Part::Day),
        "hour" => Some(Part::Hour),
        "minute" => Some(Part::Minute),
        "second" => Some(Part::Second),
        "millisecond" => Some(Part::Millisecond),
        "day_of_week" => Some(Part::DayOfWeek),
        "day_of_year" => Some(Part::DayOfYear),
        _ => None,
    };
    if let Some(part) = part {
        let rule = Rule::new(
            fixed(ValueType::I32),
            emit(move |ops| Ok(part_sql(dialect, part, arg(ops, 0)?.sql))),
        )
        .eval(part_eval(part));
        return Some(rule);
    }

    let unit = match name {
        "add_days" => Some(Unit::Days),
        "add_hours" => Some(Unit::Hours),
        "add_minutes" => Some(Unit::Minutes),
        "add_seconds" => Some(Unit::Seconds),
        "add_months" => Some(Unit::Months),
        "add_years" => Some(Unit::Years),
        _ => None,
    };
    if let Some(unit) = unit {
        let rule = Rule::new(
            ResultType::SameAsFirst,
            emit(move |ops| {
                Ok(add_unit_sql(dialect, unit, arg(ops, 0)?.sql, arg(ops, 1)?.sql))
            }),
        )
        .eval(add_unit_eval(unit));
        return Some(rule);
    }

    let rule = match name {
        "date" => Rule::new(
            fixed(ValueType::Date),
            emit(move |ops| {
                let x = arg(ops, 0)?.sql;
                Ok(match dialect {
                    Dialect::MySql => format!("DATE({x})"),
                    Dialect::Sqlite => format!("date({x})"),
                    _ => format!("CAST({x} AS DATE)"),
                })
            }),
        )
        .eval(|v| Ok(Value::Date(datetime_of(v, 0)?.date()))),

        // Instant + duration (seconds).
        "add" => Rule::new(
            ResultType::SameAsFirst,
            emit(move |ops| {
                let (x, d) = (arg(ops, 0)?.sql, arg(ops, 1)?.sql);
                Ok(match dialect {
                    Dialect::Postgres => {
                        format!("({x} + CAST({d} AS DOUBLE PRECISION) * INTERVAL '1 second')")
                    }
                    Dialect::MySql => {
                        format!("DATE_ADD({x}, INTERVAL ROUND({d} * 1000000) MICROSECOND)")
                    }
                    Dialect::Sqlite => format!("datetime({x}, printf('%+f seconds', {d}))"),
                    Dialect::SqlServer => format!(
                        "DATEADD(millisecond, CAST(ROUND({d} * 1000, 0) AS BIGINT), {x})"
                    ),
                })
            }),
        )
        .eval(|v| shift(v, |d, n| d.checked_add_signed(delta_seconds(n)?))),

        // Instant - instant, as a duration in seconds.
        "subtract" => Rule::new(
            fixed(ValueType::Interval),
            emit(move |ops| {
                let (x, y) = (arg(ops, 0)?.sql, arg(ops, 1)?.sql);
                Ok(match dialect {
                    Dialect::Postgres => format!("EXTRACT(EPOCH FROM ({x} - {y}))"),
                    Dialect::MySql => {
                        format!("(TIMESTAMPDIFF(MICROSECOND, {y}, {x}) / 1000000.0)")
                    }
                    Dialect::Sqlite => format!("((julianday({x}) - julianday({y})) * 86400.0)"),
                    Dialect::SqlServer => {
                        format!("(DATEDIFF_BIG(millisecond, {y}, {x}) / 1000.0)")
                    }
                })
            }),
        )
        .eval(|v| {
            let diff = datetime_of(v, 0)? - datetime_of(v, 1)?;
            Ok(Value::Interval(diff.num_milliseconds() as f64 / 1000.0))
        }),

        "format" => Rule::new(
            fixed(ValueType::Text),
            emit(move |ops| {
                let x = arg(ops, 0)?.sql;
                let pattern = translate_format(constant_text(arg(ops, 1)?, "format")?, dialect)?;
                let pattern = sql_string_literal(&pattern);
                Ok(match dialect {
                    Dialect::Postgres => format!("TO_CHAR({x}, {pattern})"),
                    Dialect::MySql => format!("DATE_FORMAT({x}, {pattern})"),
                    Dialect::Sqlite => format!("strftime({pattern}, {x})"),
                    Dialect::SqlServer => format!("FORMAT({x}, {pattern})"),
                })
            }),
        )
        .inline(&[1])
        .eval(|v| {
            let dt = datetime_of(v, 0)?;
            let pattern = translate_format(text_of(v, 1)?, FormatTarget::Chrono)?;
            Ok(Value::Text(dt.format(&pattern).to_string()))
        }),

        // Static: parse(text, format).
        "parse" if matches!(dialect, Dialect::Postgres | Dialect::MySql) => Rule::new(
            fixed(ValueType::DateTime),
            emit(move |ops| {
                let s = arg(ops, 0)?.sql;
                let pattern = translate_format(constant_text(arg(ops, 1)?, "format")?, dialect)?;
                let pattern = sql_string_literal(&pattern);
                Ok(match dialect {
                    Dialect::MySql => format!("STR_TO_DATE({s}, {pattern})"),
                    _ => format!("CAST(TO_TIMESTAMP({s}, {pattern}) AS TIMESTAMP)"),
                })
            }),
        )
        .inline(&[1])
        .eval(|v| {
            let text = text_of(v, 0)?;
            let pattern = translate_format(text_of(v, 1)?, FormatTarget::Chrono)?;
            NaiveDateTime::parse_from_str(text, &pattern)
                .or_else(|_| {
                    NaiveDate::parse_from_str(text, &pattern)
                        .map(|d| d.and_time(chrono::NaiveTime::MIN))
                })
                .map(Value::DateTime)
                .map_err(|e| OrmError::conversion(format!("cannot parse '{text}': {e}")))
        }),

        "now" if tag == TypeTag::DateTime => Rule::new(
            fixed(ValueType::DateTime),
            emit(move |_| {
                Ok(match dialect {
                    Dialect::Postgres => "LOCALTIMESTAMP",
                    Dialect::MySql => "NOW()",
                    Dialect::Sqlite => "datetime('now', 'localtime')",
                    Dialect::SqlServer => "SYSDATETIME()",
                }
                .to_string())
            }),
        ),
        "utc_now" if tag == TypeTag::DateTime => Rule::new(
            fixed(ValueType::DateTimeUtc),
            emit(move |_| {
                Ok(match dialect {
                    Dialect::Postgres => "NOW()",
                    Dialect::MySql => "UTC_TIMESTAMP()",
                    Dialect::Sqlite => "datetime('now')",
                    Dialect::SqlServer => "SYSUTCDATETIME()",
                }
                .to_string())
            }),
        ),
        "today" => Rule::new(
            fixed(ValueType::Date),
            emit(move |_| {
                Ok(match dialect {
                    Dialect::Postgres => "CURRENT_DATE",
                    Dialect::MySql => "CURDATE()",
                    Dialect::Sqlite => "date('now', 'localtime')",
                    Dialect::SqlServer => "CAST(GETDATE() AS DATE)",
                }
                .to_string())
            }),
        ),

        // Range bounds fold to constants on the host.
        "min_value" => Rule::new(
            fixed(ValueType::DateTime),
            emit(|_| Err(OrmError::unsupported("min_value is host-evaluated"))),
        )
        .eval(|_| {
            NaiveDate::from_ymd_opt(1, 1, 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(Value::DateTime)
                .ok_or_else(|| eval_err("min_value"))
        }),
        "max_value" => Rule::new(
            fixed(ValueType::DateTime),
            emit(|_| Err(OrmError::unsupported("max_value is host-evaluated"))),
        )
        .eval(|_| {
            NaiveDate::from_ymd_opt(9999, 12, 31)
                .and_then(|d| d.and_hms_milli_opt(23, 59, 59, 999))
                .map(Value::DateTime)
                .ok_or_else(|| eval_err("max_value"))
        }),

        "to_string" => to_string_rule(dialect),
        _ => return None,
    };
    Some(rule)
}

// ==================== Duration (seconds) ====================

fn duration(dialect: Dialect, name: &str) -> Option<Rule> {
    let (divisor, whole, modulo): (f64, bool, Option<i64>) = match name {
        "total_seconds" => (1.0, false, None),
        "total_minutes" => (60.0, false, None),
        "total_hours" => (3_600.0, false, None),
        "total_days" => (86_400.0, false, None),
        "days" => (86_400.0, true, None),
        "hours" => (3_600.0, true, Some(24)),
        "minutes" => (60.0, true, Some(60)),
        "seconds" => (1.0, true, Some(60)),
        _ => return None,
    };

    let result = if whole { ValueType::I32 } else { ValueType::F64 };
    let rule = Rule::new(
        fixed(result),
        emit(move |ops| {
            let d = dialect.cast(arg(ops, 0)?.sql, &ValueType::F64);
            let scaled = if divisor == 1.0 {
                d
            } else {
                format!("({d} / {divisor:.1})")
            };
            if !whole {
                return Ok(scaled);
            }
            let floored = format!("CAST(FLOOR({scaled}) AS {})", dialect.native_type(&ValueType::I32));
            Ok(match modulo {
                Some(m) => format!("({floored} % {m})"),
                None => floored,
            })
        }),
    );

    let eval: fn(&[Value]) -> OrmResult<Value> = match name {
        "total_seconds" => |v| Ok(Value::F64(number_of(v, 0)?)),
        "total_minutes" => |v| Ok(Value::F64(number_of(v, 0)? / 60.0)),
        "total_hours" => |v| Ok(Value::F64(number_of(v, 0)? / 3_600.0)),
        "total_days" => |v| Ok(Value::F64(number_of(v, 0)? / 86_400.0)),
        "days" => |v| Ok(Value::I32((number_of(v, 0)? / 86_400.0).floor() as i32)),
        "hours" => |v| Ok(Value::I32((number_of(v, 0)? / 3_600.0).floor() as i32 % 24)),
        "minutes" => |v| Ok(Value::I32((number_of(v, 0)? / 60.0).floor() as i32 % 60)),
        _ => |v| Ok(Value::I32(number_of(v, 0)?.floor() as i32 % 60)),
    };
    Some(rule.eval(eval))
}

// ==================== String ====================

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn like_escape_clause(dialect: Dialect) -> &'static str {
    match dialect {
        Dialect::Sqlite | Dialect::SqlServer => " ESCAPE '\\'",
        Dialect::Postgres | Dialect::MySql => "",
    }
}

#[derive(Clone, Copy)]
enum Like {
    Contains,
    StartsWith,
    EndsWith,
}

fn like_rule(dialect: Dialect, kind: Like) -> Rule {
    let prepare: fn(usize, Value) -> OrmResult<Value> = match kind {
        Like::Contains => |i, v| like_pattern(i, v, "%", "%"),
        Like::StartsWith => |i, v| like_pattern(i, v, "", "%"),
        Like::EndsWith => |i, v| like_pattern(i, v, "%", ""),
    };
    let eval: fn(&[Value]) -> OrmResult<Value> = match kind {
        Like::Contains => |v| Ok(Value::Bool(text_of(v, 0)?.contains(text_of(v, 1)?))),
        Like::StartsWith => |v| Ok(Value::Bool(text_of(v, 0)?.starts_with(text_of(v, 1)?))),
        Like::EndsWith => |v| Ok(Value::Bool(text_of(v, 0)?.ends_with(text_of(v, 1)?))),
    };
    Rule::new(
        fixed(ValueType::Bool),
        emit(move |ops| {
            let x = arg(ops, 0)?.sql;
            let s = arg(ops, 1)?;
            let escape = like_escape_clause(dialect);
            if s.constant.is_some() {
                return Ok(format!("{x} LIKE {}{escape}", s.sql));
            }
            let pattern = match kind {
                Like::Contains => dialect.concat(&["'%'", s.sql, "'%'"]),
                Like::StartsWith => dialect.concat(&[s.sql, "'%'"]),
                Like::EndsWith => dialect.concat(&["'%'", s.sql]),
            };
            Ok(format!("{x} LIKE {pattern}"))
        }),
    )
    .prepare(prepare)
    .eval(eval)
}

fn like_pattern(index: usize, value: Value, prefix: &str, suffix: &str) -> OrmResult<Value> {
    if index != 1 {
        return Ok(value);
    }
    match value {
        Value::Text(s) => Ok(Value::Text(format!("{prefix}{}{suffix}", escape_like(&s)))),
        other => Err(OrmError::unsupported(format!(
            "LIKE pattern must be text, got {}",
            other.kind_name()
        ))),
    }
}

fn plain_text(v: &Value) -> String {
    match v {
        Value::Text(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn to_string_rule(dialect: Dialect) -> Rule {
    Rule::new(
        fixed(ValueType::Text),
        emit(move |ops| Ok(dialect.cast(arg(ops, 0)?.sql, &ValueType::Text))),
    )
    .eval(|v| Ok(Value::Text(v.first().map(plain_text).unwrap_or_default())))
}

fn string(dialect: Dialect, name: &str) -> Option<Rule> {
    let unary = |func: &'static str, result: ValueType, eval: fn(&[Value]) -> OrmResult<Value>| {
        Rule::new(
            fixed(result),
            emit(move |ops| Ok(format!("{func}({})", arg(ops, 0)?.sql))),
        )
        .eval(eval)
    };

    let rule = match name {
        "len" => unary(
            match dialect {
                Dialect::SqlServer => "LEN",
                Dialect::Sqlite => "LENGTH",
                Dialect::Postgres | Dialect::MySql => "CHAR_LENGTH",
            },
            ValueType::I32,
            |v| Ok(Value::I32(text_of(v, 0)?.chars().count() as i32)),
        ),
        "to_upper" => unary("UPPER", ValueType::Text, |v| {
            Ok(Value::Text(text_of(v, 0)?.to_uppercase()))
        }),
        "to_lower" => unary("LOWER", ValueType::Text, |v| {
            Ok(Value::Text(text_of(v, 0)?.to_lowercase()))
        }),
        "trim" => unary("TRIM", ValueType::Text, |v| {
            Ok(Value::Text(text_of(v, 0)?.trim().to_string()))
        }),
        "contains" => like_rule(dialect, Like::Contains),
        "starts_with" => like_rule(dialect, Like::StartsWith),
        "ends_with" => like_rule(dialect, Like::EndsWith),

        // Zero-based start on the host, one-based in SQL.
        "substring" => Rule::new(
            fixed(ValueType::Text),
            emit(move |ops| {
                let x = arg(ops, 0)?.sql;
                let start = format!("({}) + 1", arg(ops, 1)?.sql);
                let func = if dialect == Dialect::Sqlite { "SUBSTR" } else { "SUBSTRING" };
                Ok(match (ops.get(2), dialect) {
                    (Some(len), _) => format!("{func}({x}, {start}, {})", len.sql),
                    (None, Dialect::SqlServer) => format!("{func}({x}, {start}, LEN({x}))"),
                    (None, _) => format!("{func}({x}, {start})"),
                })
            }),
        )
        .eval(|v| {
            let s = text_of(v, 0)?;
            let start = usize::try_from(number_of(v, 1)? as i64)
                .map_err(|_| eval_err("substring (negative start)"))?;
            let chars = s.chars().skip(start);
            let out: String = match v.get(2) {
                Some(len) => {
                    let len = len.as_i64().ok_or_else(|| eval_err("substring"))?;
                    chars.take(usize::try_from(len).unwrap_or(0)).collect()
                }
                None => chars.collect(),
            };
            Ok(Value::Text(out))
        }),

        "replace" => Rule::new(
            fixed(ValueType::Text),
            emit(|ops| {
                Ok(format!(
                    "REPLACE({}, {}, {})",
                    arg(ops, 0)?.sql,
                    arg(ops, 1)?.sql,
                    arg(ops, 2)?.sql
                ))
            }),
        )
        .eval(|v| {
            Ok(Value::Text(
                text_of(v, 0)?.replace(text_of(v, 1)?, text_of(v, 2)?),
            ))
        }),

        // Static: is_null_or_empty(x).
        "is_null_or_empty" => Rule::new(
            fixed(ValueType::Bool),
            emit(|ops| {
                let x = arg(ops, 0)?.sql;
                Ok(format!("({x} IS NULL OR {x} = '')"))
            }),
        )
        .eval(|v| {
            Ok(Value::Bool(match v.first() {
                None | Some(Value::Null) => true,
                Some(Value::Text(s)) => s.is_empty(),
                Some(_) => false,
            }))
        }),

        "to_string" => to_string_rule(dialect),
        _ => return None,
    };
    Some(rule)
}

// ==================== Math ====================

fn math(dialect: Dialect, name: &str) -> Option<Rule> {
    let rule = match name {
        "abs" => Rule::new(
            ResultType::SameAsFirst,
            emit(|ops| Ok(format!("ABS({})", arg(ops, 0)?.sql))),
        )
        .eval(|v| match v.first() {
            Some(Value::I16(x)) => Ok(Value::I16(x.abs())),
            Some(Value::I32(x)) => Ok(Value::I32(x.abs())),
            Some(Value::I64(x)) => Ok(Value::I64(x.abs())),
            _ => Ok(Value::F64(number_of(v, 0)?.abs())),
        }),
        "floor" | "ceiling" => {
            let func = if name == "floor" { "FLOOR" } else { "CEILING" };
            let eval: fn(&[Value]) -> OrmResult<Value> = if name == "floor" {
                |v| Ok(Value::F64(number_of(v, 0)?.floor()))
            } else {
                |v| Ok(Value::F64(number_of(v, 0)?.ceil()))
            };
            Rule::new(
                ResultType::SameAsFirst,
                emit(move |ops| Ok(format!("{func}({})", arg(ops, 0)?.sql))),
            )
            .eval(eval)
        }
        "round" => Rule::new(
            ResultType::SameAsFirst,
            emit(|ops| {
                let x = arg(ops, 0)?.sql;
                Ok(match ops.get(1) {
                    Some(digits) => format!("ROUND({x}, {})", digits.sql),
                    None => format!("ROUND({x})"),
                })
            }),
        )
        .eval(|v| {
            let x = number_of(v, 0)?;
            let digits = v.get(1).and_then(Value::as_i64).unwrap_or(0) as i32;
            let factor = 10f64.powi(digits);
            Ok(Value::F64((x * factor).round() / factor))
        }),
        "power" => Rule::new(
            fixed(ValueType::F64),
            emit(move |ops| {
                let (x, y) = (arg(ops, 0)?.sql, arg(ops, 1)?.sql);
                Ok(match dialect {
                    Dialect::Postgres => {
                        format!("POWER(CAST({x} AS DOUBLE PRECISION), {y})")
                    }
                    _ => format!("POWER({x}, {y})"),
                })
            }),
        )
        .eval(|v| Ok(Value::F64(number_of(v, 0)?.powf(number_of(v, 1)?)))),
        "to_string" => to_string_rule(dialect),
        _ => return None,
    };
    Some(rule)
}

// ==================== Uuid ====================

fn uuid(dialect: Dialect, name: &str) -> Option<Rule> {
    match name {
        "new" => {
            let func = match dialect {
                Dialect::Postgres => "gen_random_uuid()",
                Dialect::MySql => "UUID()",
                Dialect::SqlServer => "NEWID()",
                Dialect::Sqlite => return None,
            };
            Some(Rule::new(
                fixed(ValueType::Uuid),
                emit(move |_| Ok(func.to_string())),
            ))
        }
        "to_string" => Some(to_string_rule(dialect)),
        _ => None,
    }
}

// ==================== Collections ====================

fn collection(dialect: Dialect, name: &str) -> Option<Rule> {
    match name {
        // Constant or captured collection: operand 0 arrives expanded into a
        // placeholder list.
        "contains" => Some(
            Rule::new(
                fixed(ValueType::Bool),
                emit(move |ops| {
                    let list = arg(ops, 0)?;
                    let item = arg(ops, 1)?.sql;
                    match list.list_len {
                        Some(0) => Ok(dialect.false_predicate().to_string()),
                        Some(_) => Ok(format!("{item} IN ({})", list.sql)),
                        None => Err(OrmError::unsupported(
                            "collection membership needs an expanded constant list",
                        )),
                    }
                }),
            )
            .eval(|v| match v.first() {
                Some(Value::Array(items)) => {
                    let item = v.get(1).ok_or_else(|| eval_err("contains"))?;
                    Ok(Value::Bool(items.iter().any(|x| loosely_equal(x, item))))
                }
                _ => Err(eval_err("contains")),
            }),
        ),
        // Array-typed column containment.
        "contains_column" if dialect == Dialect::Postgres => Some(
            Rule::new(
                fixed(ValueType::Bool),
                emit(|ops| {
                    Ok(format!(
                        "{} @> ARRAY[{}]",
                        arg(ops, 0)?.sql,
                        arg(ops, 1)?.sql
                    ))
                }),
            )
            .not_negatable(),
        ),
        _ => None,
    }
}

/// Equality across integer widths.
pub(crate) fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op<'a>(sql: &'a str, vt: &'a ValueType) -> Operand<'a> {
        Operand {
            sql,
            value_type: vt,
            constant: None,
            list_len: None,
        }
    }

    #[test]
    fn year_extraction_per_dialect() {
        let vt = ValueType::DateTime;
        let ops = [op("o.created_at", &vt)];
        let pg = build(Dialect::Postgres, TypeTag::DateTime, "year").unwrap();
        assert_eq!(
            (pg.emit)(&ops).unwrap(),
            "CAST(EXTRACT(YEAR FROM o.created_at) AS INTEGER)"
        );
        let ms = build(Dialect::SqlServer, TypeTag::DateTime, "year").unwrap();
        assert_eq!((ms.emit)(&ops).unwrap(), "DATEPART(year, o.created_at)");
        let lite = build(Dialect::Sqlite, TypeTag::DateTime, "year").unwrap();
        assert_eq!(
            (lite.emit)(&ops).unwrap(),
            "CAST(strftime('%Y', o.created_at) AS INTEGER)"
        );
    }

    #[test]
    fn format_uses_translated_pattern() {
        let vt = ValueType::DateTime;
        let text = ValueType::Text;
        let fmt = Value::Text("yyyy-MM-dd".into());
        let ops = [
            op("o.created_at", &vt),
            Operand {
                sql: "",
                value_type: &text,
                constant: Some(&fmt),
                list_len: None,
            },
        ];
        let rule = build(Dialect::Postgres, TypeTag::DateTime, "format").unwrap();
        assert_eq!(rule.inline, &[1]);
        assert_eq!(
            (rule.emit)(&ops).unwrap(),
            "TO_CHAR(o.created_at, 'YYYY-MM-DD')"
        );
        let rule = build(Dialect::MySql, TypeTag::DateTime, "format").unwrap();
        assert_eq!(
            (rule.emit)(&ops).unwrap(),
            "DATE_FORMAT(o.created_at, '%Y-%m-%d')"
        );
    }

    #[test]
    fn host_evaluation_of_date_members() {
        let dt = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(13, 5, 0)
            .unwrap();
        let rule = build(Dialect::Postgres, TypeTag::DateTime, "add_years").unwrap();
        let shifted = (rule.eval.unwrap())(&[Value::DateTime(dt), Value::I32(1)]).unwrap();
        assert_eq!(
            shifted,
            Value::DateTime(NaiveDate::from_ymd_opt(2025, 2, 28).unwrap().and_hms_opt(13, 5, 0).unwrap())
        );
        let rule = build(Dialect::Postgres, TypeTag::DateTime, "format").unwrap();
        let text = (rule.eval.unwrap())(&[Value::DateTime(dt), Value::Text("yyyy/MM/dd HH:mm".into())])
            .unwrap();
        assert_eq!(text, Value::Text("2024/02/29 13:05".into()));
    }

    #[test]
    fn inlined_format_rejects_control_characters() {
        let vt = ValueType::DateTime;
        let text = ValueType::Text;
        let fmt = Value::Text("yyyy\u{1}MM".into());
        let ops = [
            op("o.created_at", &vt),
            Operand {
                sql: "",
                value_type: &text,
                constant: Some(&fmt),
                list_len: None,
            },
        ];
        let rule = build(Dialect::Postgres, TypeTag::DateTime, "format").unwrap();
        assert!(matches!((rule.emit)(&ops), Err(OrmError::Validation(_))));
    }

    #[test]
    fn parse_is_not_available_everywhere() {
        assert!(build(Dialect::Postgres, TypeTag::DateTime, "parse").is_some());
        assert!(build(Dialect::Sqlite, TypeTag::DateTime, "parse").is_none());
        assert!(build(Dialect::SqlServer, TypeTag::DateTime, "parse").is_none());
    }

    #[test]
    fn duration_components_are_float_seconds() {
        let vt = ValueType::Interval;
        let ops = [op("t.elapsed", &vt)];
        let rule = build(Dialect::Postgres, TypeTag::Duration, "total_hours").unwrap();
        assert_eq!(
            (rule.emit)(&ops).unwrap(),
            "(CAST(t.elapsed AS DOUBLE PRECISION) / 3600.0)"
        );
        let rule = build(Dialect::Postgres, TypeTag::Duration, "minutes").unwrap();
        assert_eq!(
            (rule.emit)(&ops).unwrap(),
            "(CAST(FLOOR((CAST(t.elapsed AS DOUBLE PRECISION) / 60.0)) AS INTEGER) % 60)"
        );
        let eval = rule.eval.unwrap();
        assert_eq!(eval(&[Value::Interval(3_725.0)]).unwrap(), Value::I32(2));
    }

    #[test]
    fn like_patterns_escape_wildcards() {
        let rule = build(Dialect::Postgres, TypeTag::String, "contains").unwrap();
        let prepared = (rule.prepare.unwrap())(1, Value::Text("50%_off".into())).unwrap();
        assert_eq!(prepared, Value::Text("%50\\%\\_off%".into()));

        let text = ValueType::Text;
        let pattern = Value::Text("%a%".into());
        let ops = [
            op("u.name", &text),
            Operand {
                sql: "$1",
                value_type: &text,
                constant: Some(&pattern),
                list_len: None,
            },
        ];
        assert_eq!((rule.emit)(&ops).unwrap(), "u.name LIKE $1");
        let lite = build(Dialect::Sqlite, TypeTag::String, "contains").unwrap();
        assert_eq!((lite.emit)(&ops).unwrap(), "u.name LIKE $1 ESCAPE '\\'");
    }

    #[test]
    fn like_against_column_concatenates() {
        let text = ValueType::Text;
        let ops = [op("u.name", &text), op("u.nick", &text)];
        let rule = build(Dialect::MySql, TypeTag::String, "starts_with").unwrap();
        assert_eq!((rule.emit)(&ops).unwrap(), "u.name LIKE CONCAT(u.nick, '%')");
    }

    #[test]
    fn substring_shifts_to_one_based() {
        let text = ValueType::Text;
        let int = ValueType::I32;
        let ops = [op("u.name", &text), op("$1", &int), op("$2", &int)];
        let rule = build(Dialect::Postgres, TypeTag::String, "substring").unwrap();
        assert_eq!((rule.emit)(&ops).unwrap(), "SUBSTRING(u.name, ($1) + 1, $2)");
        let eval = rule.eval.unwrap();
        assert_eq!(
            eval(&[Value::Text("hello".into()), Value::I32(1), Value::I32(3)]).unwrap(),
            Value::Text("ell".into())
        );
    }

    #[test]
    fn empty_constant_list_is_always_false() {
        let arr = ValueType::Array(Box::new(ValueType::I32));
        let int = ValueType::I32;
        let rule = build(Dialect::Postgres, TypeTag::Collection, "contains").unwrap();
        let empty = [
            Operand {
                sql: "",
                value_type: &arr,
                constant: None,
                list_len: Some(0),
            },
            op("o.id", &int),
        ];
        assert_eq!((rule.emit)(&empty).unwrap(), "1 = 0");
        let three = [
            Operand {
                sql: "$1, $2, $3",
                value_type: &arr,
                constant: None,
                list_len: Some(3),
            },
            op("o.id", &int),
        ];
        assert_eq!((rule.emit)(&three).unwrap(), "o.id IN ($1, $2, $3)");
    }

    #[test]
    fn column_containment_is_postgres_only() {
        let rule = build(Dialect::Postgres, TypeTag::Collection, "contains_column").unwrap();
        assert!(!rule.negatable);
        assert!(build(Dialect::MySql, TypeTag::Collection, "contains_column").is_none());
    }

    #[test]
    fn uuid_generation_per_dialect() {
        let rule = build(Dialect::SqlServer, TypeTag::Uuid, "new").unwrap();
        assert_eq!((rule.emit)(&[]).unwrap(), "NEWID()");
        assert!(build(Dialect::Sqlite, TypeTag::Uuid, "new").is_none());
    }
}
