use once_cell::sync::OnceCell;

/// Formats hours or degrees as `[-]HH:MM[:SS[.f]]`.
/// `frac` selects precision: 3 = minutes, 6 = seconds,
/// 8 = tenths of second, 9 = hundredths of second
pub fn value_to_sexagesimal(value: f64, zero: bool, frac: u8) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let sign = if value < 0.0 { "-" } else { "" };
    let (units_per_sec, sec_digits) = match frac {
        3 => (1.0 / 60.0, 0),
        6 => (1.0, 0),
        8 => (10.0, 1),
        9 => (100.0, 2),
        _ => return value.to_string(),
    };
    let ticks_per_unit = 3600.0 * units_per_sec;
    let ticks = (value.abs() * ticks_per_unit).round() as u64;
    let ticks_per_unit = ticks_per_unit as u64;
    let whole = ticks / ticks_per_unit;
    let rest = ticks % ticks_per_unit;

    let whole_str = if zero { format!("{:02}", whole) } else { whole.to_string() };
    if frac == 3 {
        return format!("{}{}:{:02}", sign, whole_str, rest);
    }
    let ticks_per_min = 60 * units_per_sec as u64;
    let minutes = rest / ticks_per_min;
    let sec_ticks = rest % ticks_per_min;
    let seconds = sec_ticks / units_per_sec as u64;
    let sec_fract = sec_ticks % units_per_sec as u64;
    match sec_digits {
        0 => format!("{}{}:{:02}:{:02}", sign, whole_str, minutes, seconds),
        1 => format!("{}{}:{:02}:{:02}.{}", sign, whole_str, minutes, seconds, sec_fract),
        _ => format!("{}{}:{:02}:{:02}.{:02}", sign, whole_str, minutes, seconds, sec_fract),
    }
}

#[test]
fn test_value_to_sexagesimal() {
    assert_eq!(value_to_sexagesimal(1.5, true, 3), "01:30");
    assert_eq!(value_to_sexagesimal(-1.5, false, 3), "-1:30");
    assert_eq!(value_to_sexagesimal(12.5125, true, 6), "12:30:45");
    assert_eq!(value_to_sexagesimal(0.999999, true, 6), "01:00:00");
    assert_eq!(value_to_sexagesimal(-39.917, true, 8), "-39:55:01.2");
    assert_eq!(value_to_sexagesimal(2.53, true, 9), "02:31:48.00");
}

/// Parses `[+-]D:M[:S[.f]]` or `[+-]D M S` text
pub fn sexagesimal_to_value(text: &str) -> Option<f64> {
    static RE: OnceCell<regex::Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        regex::Regex::new(r"^([+-]?)(\d+)[: ](\d+(?:\.\d+)?)(?:[: ](\d+(?:\.\d+)?))?$").unwrap()
    });
    let caps = re.captures(text.trim())?;
    let is_neg = &caps[1] == "-";
    let whole = caps[2].parse::<f64>().ok()?;
    let minutes = caps[3].parse::<f64>().ok()?;
    let seconds = match caps.get(4) {
        Some(s) => s.as_str().parse::<f64>().ok()?,
        None    => 0.0,
    };
    let value = whole + minutes / 60.0 + seconds / 3600.0;
    Some(if is_neg { -value } else { value })
}

/// Decimal number first, sexagesimal as fallback
pub fn parse_prop_value(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    text.parse::<f64>().ok()
        .or_else(|| sexagesimal_to_value(text))
        .filter(|v| v.is_finite())
}

#[test]
fn test_parse_prop_value() {
    assert_eq!(parse_prop_value("12.5"), Some(12.5));
    assert_eq!(parse_prop_value(" -3 "), Some(-3.0));
    assert_eq!(parse_prop_value(""), None);
    assert_eq!(parse_prop_value("Off"), None);
    assert_eq!(parse_prop_value("nan"), None);
    let v = parse_prop_value("12:30:45").unwrap();
    assert!(f64::abs(v - 12.5125) < 1e-9);
    let v = parse_prop_value("-39:55:01.2").unwrap();
    assert!(f64::abs(v + 39.917) < 1e-6);
    let v = parse_prop_value("+05:30").unwrap();
    assert!(f64::abs(v - 5.5) < 1e-9);
}
