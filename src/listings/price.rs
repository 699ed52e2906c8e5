//! 价格规范化
//!
//! 去掉货币和"VB"（Verhandlungsbasis）标记，按德语千分位/小数点解析，
//! 再统一输出为 `1.250 €` / `12,50 €`。无法解析时返回议价标记，不报错。

use serde::{Deserialize, Serialize};

/// 议价标记
pub const NEGOTIABLE_LABEL: &str = "VB";

const MARKERS: &[&str] = &[
    "verhandlungsbasis",
    "festpreis",
    "euro",
    "eur",
    "vb",
    "€",
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Price {
    Amount(f64),
    Negotiable,
}

impl Price {
    pub fn amount(&self) -> Option<f64> {
        match self {
            Price::Amount(v) => Some(*v),
            Price::Negotiable => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Price::Amount(v) => render_eur(*v),
            Price::Negotiable => NEGOTIABLE_LABEL.to_string(),
        }
    }
}

pub fn parse_price(raw: &str) -> Price {
    let mut cleaned = raw.to_lowercase().replace('\u{a0}', " ");
    for marker in MARKERS {
        cleaned = cleaned.replace(marker, "");
    }
    let cleaned: String = cleaned.chars().filter(|c| !c.is_whitespace()).collect();

    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ',') {
        return Price::Negotiable;
    }

    match normalize_separators(&cleaned).and_then(|n| n.parse::<f64>().ok()) {
        Some(v) if v.is_finite() && v >= 0.0 => Price::Amount(v),
        _ => Price::Negotiable,
    }
}

/// 统一为 `1234.56` 形式
fn normalize_separators(s: &str) -> Option<String> {
    let last_dot = s.rfind('.');
    let last_comma = s.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (None, None) => s.to_string(),
        (Some(d), Some(c)) => {
            // 靠后的是小数点
            let (decimal_pos, thousands) = if c > d { (c, '.') } else { (d, ',') };
            let (int_part, frac_part) = s.split_at(decimal_pos);
            let int_part: String = int_part.chars().filter(|ch| *ch != thousands).collect();
            if !int_part.chars().all(|ch| ch.is_ascii_digit()) {
                return None;
            }
            format!("{}.{}", int_part, &frac_part[1..])
        }
        (None, Some(_)) => resolve_single_separator(s, ',')?,
        (Some(_), None) => resolve_single_separator(s, '.')?,
    };

    let body = normalized.trim_start_matches('.');
    (!body.is_empty() && normalized.matches('.').count() <= 1).then_some(normalized)
}

/// 只有一种分隔符：每组恰好三位视为千分位，否则唯一一个视为小数点
fn resolve_single_separator(s: &str, sep: char) -> Option<String> {
    let groups: Vec<&str> = s.split(sep).collect();
    let thousands = groups.len() > 1
        && !groups[0].is_empty()
        && groups[0].len() <= 3
        && groups[1..].iter().all(|g| g.len() == 3);

    if thousands {
        // "1.250" / "2.500.000" 视为整数
        return Some(groups.concat());
    }
    if groups.len() == 2 && !groups[1].is_empty() && groups[1].len() <= 2 {
        return Some(format!("{}.{}", groups[0], groups[1]));
    }
    None
}

fn render_eur(value: f64) -> String {
    let cents = (value * 100.0).round() as u64;
    let (euros, rest) = (cents / 100, cents % 100);

    let digits = euros.to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(ch);
    }

    if rest == 0 {
        format!("{} €", grouped)
    } else {
        format!("{},{:02} €", grouped, rest)
    }
}
